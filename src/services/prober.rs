//! Reachability probing
//!
//! A [`ReachabilityProber`] runs one [`Probe`] per candidate URL on a bounded
//! pool and collects either every live URL or the first K that come back.
//!
//! Each probe is spawned as its own task. When `probe_first` has its K hits it
//! stops pulling candidates and drops the pool; spawned probes are detached,
//! not aborted, so in-flight requests finish on the runtime and their results
//! are discarded.

use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::HashSet;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::{ProbeMethod, SuccessPolicy};

/// Candidates shorter than this are never probed
const MIN_URL_LEN: usize = 5;

/// A single reachability check
pub trait Probe: Send + Sync + 'static {
    /// `true` when `url` is live; every failure is `false`
    fn check(&self, url: &str) -> impl Future<Output = bool> + Send;
}

/// True for URLs worth sending a request to
pub fn is_probeable(url: &str) -> bool {
    let url = url.trim();
    url.len() >= MIN_URL_LEN && (url.starts_with("http://") || url.starts_with("https://"))
}

/// HTTP probe: HEAD or streamed GET, redirects followed
pub struct HttpProbe {
    client: Client,
    method: ProbeMethod,
    success: SuccessPolicy,
}

impl HttpProbe {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        method: ProbeMethod,
        success: SuccessPolicy,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            method,
            success,
        })
    }
}

impl Probe for HttpProbe {
    async fn check(&self, url: &str) -> bool {
        let request = match self.method {
            ProbeMethod::Head => self.client.head(url),
            ProbeMethod::Get => self.client.get(url),
        };

        // The body of a GET is dropped unread with the response
        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                trace!(url = url, status = status, "probe response");
                self.success.accepts(status)
            }
            Err(e) => {
                trace!(url = url, error = %e, "probe failed");
                false
            }
        }
    }
}

/// Media probe via `ffprobe`: live when it exits cleanly and reports a video stream
pub struct MediaProbe {
    program: String,
    timeout: Duration,
}

impl MediaProbe {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }
}

impl Probe for MediaProbe {
    async fn check(&self, url: &str) -> bool {
        let child = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-i",
                url,
                "-show_entries",
                "stream=codec_type",
                "-of",
                "csv=p=0",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!(program = %self.program, error = %e, "media probe could not start");
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                output.status.success() && String::from_utf8_lossy(&output.stdout).contains("video")
            }
            Ok(Err(e)) => {
                debug!(url = url, error = %e, "media probe failed");
                false
            }
            Err(_) => {
                debug!(url = url, "media probe timed out");
                false
            }
        }
    }
}

/// Bounded-concurrency runner for a [`Probe`]
pub struct ReachabilityProber<P> {
    probe: Arc<P>,
    concurrency: usize,
    timeout: Duration,
}

impl<P> Clone for ReachabilityProber<P> {
    fn clone(&self) -> Self {
        Self {
            probe: Arc::clone(&self.probe),
            concurrency: self.concurrency,
            timeout: self.timeout,
        }
    }
}

impl<P: Probe> ReachabilityProber<P> {
    /// `timeout` bounds each probe on top of whatever the probe enforces itself
    pub fn new(probe: P, concurrency: usize, timeout: Duration) -> Self {
        Self {
            probe: Arc::new(probe),
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn probe(&self) -> &P {
        &self.probe
    }

    /// Distinct, probeable candidates in submission order
    fn candidates(urls: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        urls.iter()
            .map(|u| u.trim())
            .filter(|u| is_probeable(u))
            .filter(|u| seen.insert(u.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Completion-ordered stream of `(index, url, live)` for every candidate
    fn dispatch(
        &self,
        candidates: Vec<String>,
    ) -> impl futures::Stream<Item = (usize, String, bool)> {
        let probe = Arc::clone(&self.probe);
        let timeout = self.timeout;

        stream::iter(candidates.into_iter().enumerate())
            .map(move |(index, url)| {
                let probe = Arc::clone(&probe);
                let handle = tokio::spawn(async move {
                    let live = tokio::time::timeout(timeout, probe.check(&url))
                        .await
                        .unwrap_or(false);
                    (index, url, live)
                });
                async move { handle.await.ok() }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|result| async move { result })
    }

    /// Every live URL, in submission order
    pub async fn probe_all(&self, urls: &[String]) -> Vec<String> {
        let candidates = Self::candidates(urls);
        if candidates.is_empty() {
            return Vec::new();
        }
        let total = candidates.len();

        let mut results: Vec<(usize, String)> = self
            .dispatch(candidates)
            .filter_map(|(index, url, live)| async move { live.then_some((index, url)) })
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        debug!(probed = total, live = results.len(), "probe_all finished");
        results.into_iter().map(|(_, url)| url).collect()
    }

    /// The first `k` live URLs in completion order.
    ///
    /// No candidate is dispatched after the k-th hit.
    pub async fn probe_first(&self, urls: &[String], k: usize) -> Vec<String> {
        if k == 0 {
            return Vec::new();
        }
        let candidates = Self::candidates(urls);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut live = Vec::with_capacity(k);
        let results = self.dispatch(candidates);
        futures::pin_mut!(results);

        while let Some((_, url, ok)) = results.next().await {
            if ok {
                live.push(url);
                if live.len() >= k {
                    break;
                }
            }
        }

        live
    }

    /// First live URL, if any
    pub async fn first_live(&self, urls: &[String]) -> Option<String> {
        self.probe_first(urls, 1).await.into_iter().next()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted probe: `(delay, live)` per URL, unknown URLs are dead
    #[derive(Default)]
    pub struct ScriptedProbe {
        pub script: HashMap<String, (Duration, bool)>,
        pub started: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        pub fn live(urls: &[&str]) -> Self {
            let mut probe = Self::default();
            for url in urls {
                probe
                    .script
                    .insert(url.to_string(), (Duration::ZERO, true));
            }
            probe
        }

        pub fn with(mut self, url: &str, delay_ms: u64, live: bool) -> Self {
            self.script
                .insert(url.to_string(), (Duration::from_millis(delay_ms), live));
            self
        }

        pub fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    impl Probe for ScriptedProbe {
        async fn check(&self, url: &str) -> bool {
            self.started.lock().unwrap().push(url.to_string());
            let (delay, live) = self
                .script
                .get(url)
                .copied()
                .unwrap_or((Duration::ZERO, false));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            live
        }
    }

    pub fn prober(probe: ScriptedProbe, concurrency: usize) -> ReachabilityProber<ScriptedProbe> {
        ReachabilityProber::new(probe, concurrency, Duration::from_secs(5))
    }
}
