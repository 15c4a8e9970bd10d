use anyhow::{bail, Result};
use std::collections::HashSet;
use std::time::Duration;

use crate::config::{Config, LinkChecker};
use crate::models::{FileSummary, RunSummary};
use crate::services::http::HttpFetcher;
use crate::services::playlist::{fetch_source_links, SourceLinks};
use crate::services::prober::{HttpProbe, MediaProbe, Probe, ReachabilityProber};
use crate::services::store::CategoryStore;

/// Drops dead stream URLs and pulls replacements from alternate playlists
pub struct LinkRepair<P> {
    store: CategoryStore,
    prober: ReachabilityProber<P>,
    sources: SourceLinks,
    exclude: String,
}

impl<P: Probe> LinkRepair<P> {
    pub fn new(
        store: CategoryStore,
        prober: ReachabilityProber<P>,
        sources: SourceLinks,
        exclude: impl Into<String>,
    ) -> Self {
        Self {
            store,
            prober,
            sources,
            exclude: exclude.into(),
        }
    }

    pub async fn run(&self, summary: &mut RunSummary) -> Result<()> {
        for file in self.store.list_files(&self.exclude).await? {
            match self.repair_file(&file).await {
                Ok(file_summary) => summary.files.push(file_summary),
                Err(e) => {
                    tracing::error!(file = %file, error = %e, "link repair failed");
                    summary.note(format!("{}: {}", file, e));
                }
            }
        }
        Ok(())
    }

    async fn repair_file(&self, file: &str) -> Result<FileSummary> {
        let mut file_summary = FileSummary::new(file);
        let mut doc = self.store.load(file).await?;
        file_summary.total = doc.channels().len();
        tracing::info!(file = %file, channels = file_summary.total, "Processing file");

        let all_urls: Vec<String> = doc
            .channels()
            .iter()
            .flat_map(|c| c.stream_urls.iter().cloned())
            .collect();
        let working: HashSet<String> = self.prober.probe_all(&all_urls).await.into_iter().collect();

        for channel in doc.channels_mut().iter_mut() {
            let kept: Vec<String> = channel
                .stream_urls
                .iter()
                .filter(|u| working.contains(u.trim()))
                .map(|u| u.trim().to_string())
                .collect();
            let broken = channel.stream_urls.len() - kept.len();
            if broken == 0 {
                continue;
            }

            tracing::info!(channel = %channel.name, broken = broken, "Found broken links");
            channel.stream_urls = kept;
            file_summary.repaired += 1;

            let Some(alternates) = self.sources.get(&channel.name) else {
                continue;
            };
            let fresh: Vec<String> = alternates
                .iter()
                .filter(|u| !channel.stream_urls.contains(u))
                .cloned()
                .collect();
            if let Some(replacement) = self.prober.first_live(&fresh).await {
                tracing::info!(channel = %channel.name, url = %replacement, "Found working replacement");
                channel.push_stream(&replacement);
            }
        }

        // Files without broken links keep their original bytes
        if file_summary.repaired > 0 {
            file_summary.written = self.store.save(file, &doc).await?.is_written();
        }
        Ok(file_summary)
    }
}

/// Entry point for the `links` subcommand
pub async fn run(config: &Config, summary: &mut RunSummary) -> Result<()> {
    let store = CategoryStore::from_config(config);
    if !store.exists().await {
        bail!("Directory '{}' not found", store.dir().display());
    }

    let fetcher = HttpFetcher::from_config(config)?;
    let sources = fetch_source_links(&fetcher, &config.playlist_source_urls()).await?;
    summary.note(format!("alternate sources: {} channel names", sources.len()));

    let exclude = events_file_name(config);
    match config.link_checker {
        LinkChecker::Ffprobe => {
            let timeout = Duration::from_millis(config.media_probe_timeout_ms);
            let prober = ReachabilityProber::new(
                MediaProbe::new(&config.ffprobe_path, timeout),
                config.probe_concurrency,
                timeout,
            );
            LinkRepair::new(store, prober, sources, exclude).run(summary).await
        }
        LinkChecker::Http => {
            let timeout = Duration::from_millis(config.probe_timeout_ms);
            let probe = HttpProbe::new(
                &config.user_agent,
                timeout,
                config.stream_probe_method,
                config.probe_success,
            )?;
            let prober = ReachabilityProber::new(probe, config.probe_concurrency, timeout);
            LinkRepair::new(store, prober, sources, exclude).run(summary).await
        }
    }
}

/// Bare file name of the events file, which lives among the category files
pub fn events_file_name(config: &Config) -> String {
    std::path::Path::new(&config.events_file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| config.events_file.clone())
}
