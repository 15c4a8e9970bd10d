//! Logo backfill
//!
//! Channels without a usable logo walk an ordered list of sources. Each
//! source yields candidate image URLs which are checked with the logo prober;
//! the first live one wins. The default placeholder is taken without a probe.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::{Config, LogoSource};
use crate::models::Channel;
use crate::services::http::HttpFetcher;
use crate::services::prober::{Probe, ReachabilityProber};

/// Search results considered per query
const MAX_SEARCH_RESULTS: usize = 5;
const THUMBNAIL_SIZE: &str = "300";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WikiResponse {
    #[serde(default)]
    query: Option<WikiQuery>,
}

#[derive(Debug, Deserialize)]
struct WikiQuery {
    #[serde(default)]
    pages: BTreeMap<String, WikiPage>,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    #[serde(default)]
    thumbnail: Option<WikiThumbnail>,
}

#[derive(Debug, Deserialize)]
struct WikiThumbnail {
    source: String,
}

/// True when `logo` is set and is not the placeholder
pub fn has_valid_logo(logo: &str, default_logo: &str) -> bool {
    let logo = logo.trim();
    !logo.is_empty() && logo != default_logo
}

pub struct LogoBackfill<P> {
    prober: ReachabilityProber<P>,
    fetcher: HttpFetcher,
    sources: Vec<LogoSource>,
    default_logo: String,
    search_url: Option<String>,
    search_delay: Duration,
    encyclopedia_url: String,
    last_search: Option<Instant>,
}

impl<P: Probe> LogoBackfill<P> {
    pub fn new(prober: ReachabilityProber<P>, fetcher: HttpFetcher, config: &Config) -> Self {
        Self {
            prober,
            fetcher,
            sources: config.logo_sources.clone(),
            default_logo: config.default_logo.clone(),
            search_url: config.logo_search_url.clone(),
            search_delay: Duration::from_millis(config.search_delay_ms),
            encyclopedia_url: config.encyclopedia_api_url.clone(),
            last_search: None,
        }
    }

    /// Fill in `channel.logo_url` if it is missing or the placeholder.
    /// Returns whether the value changed.
    pub async fn backfill(&mut self, channel: &mut Channel, catalog_logo: Option<&str>) -> bool {
        if has_valid_logo(&channel.logo_url, &self.default_logo) {
            return false;
        }

        match self.resolve(&channel.name, catalog_logo).await {
            Some(logo) if logo != channel.logo_url => {
                tracing::debug!(channel = %channel.id, logo = %logo, "logo backfilled");
                channel.logo_url = logo;
                true
            }
            _ => false,
        }
    }

    /// Walk the configured sources for `name`
    pub async fn resolve(&mut self, name: &str, catalog_logo: Option<&str>) -> Option<String> {
        for source in self.sources.clone() {
            let candidates = match source {
                LogoSource::Catalog => catalog_logo
                    .map(|l| vec![l.trim().to_string()])
                    .unwrap_or_default(),
                LogoSource::Search => self.search_candidates(name).await,
                LogoSource::Encyclopedia => self.encyclopedia_candidates(name).await,
                LogoSource::Default => {
                    if self.default_logo.is_empty() {
                        continue;
                    }
                    return Some(self.default_logo.clone());
                }
            };

            if candidates.is_empty() {
                continue;
            }
            if let Some(hit) = self.prober.first_live(&candidates).await {
                tracing::trace!(source = ?source, channel = name, "logo source hit");
                return Some(hit);
            }
        }
        None
    }

    async fn search_candidates(&mut self, name: &str) -> Vec<String> {
        let Some(template) = self.search_url.as_deref() else {
            return Vec::new();
        };

        if let Some(last) = self.last_search {
            let elapsed = last.elapsed();
            if elapsed < self.search_delay {
                tokio::time::sleep(self.search_delay - elapsed).await;
            }
        }

        let query = format!("{} logo", name);
        let url = template.replace("{query}", &urlencoding::encode(&query));
        let result = self.fetcher.get_json::<SearchResponse>(&url).await;
        self.last_search = Some(Instant::now());

        match result {
            Ok(resp) => resp
                .items
                .into_iter()
                .filter_map(|item| item.link)
                .take(MAX_SEARCH_RESULTS)
                .collect(),
            Err(e) => {
                tracing::warn!(channel = name, error = %e, "logo search failed");
                Vec::new()
            }
        }
    }

    async fn encyclopedia_candidates(&self, name: &str) -> Vec<String> {
        let url = match Url::parse_with_params(
            &self.encyclopedia_url,
            &[
                ("action", "query"),
                ("prop", "pageimages"),
                ("format", "json"),
                ("redirects", "1"),
                ("pithumbsize", THUMBNAIL_SIZE),
                ("titles", name),
            ],
        ) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %self.encyclopedia_url, error = %e, "invalid encyclopedia url");
                return Vec::new();
            }
        };

        match self.fetcher.get_json::<WikiResponse>(url.as_str()).await {
            Ok(resp) => resp
                .query
                .map(|q| {
                    q.pages
                        .into_values()
                        .filter_map(|page| page.thumbnail.map(|t| t.source))
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!(channel = name, error = %e, "encyclopedia lookup failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::http::RetryPolicy;
    use crate::services::prober::testing::{prober, ScriptedProbe};
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    const DEFAULT: &str = "http://default/logo.png";

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn lookup_app() -> Router {
        Router::new()
            .route(
                "/search",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let query = q.get("q").cloned().unwrap_or_default();
                    Json(json!({
                        "items": [
                            {"link": format!("http://img/{}/dead.png", query.replace(' ', "_"))},
                            {"link": "http://img/search-hit.png"},
                            {"title": "no link"}
                        ]
                    }))
                }),
            )
            .route(
                "/w/api.php",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("prop").map(String::as_str), Some("pageimages"));
                    Json(json!({
                        "query": {"pages": {"42": {
                            "title": q.get("titles").cloned().unwrap_or_default(),
                            "thumbnail": {"source": "http://img/wiki.png"}
                        }}}
                    }))
                }),
            )
    }

    fn config(base: &str, sources: Vec<LogoSource>) -> Config {
        let mut config = Config::from_env();
        config.default_logo = DEFAULT.into();
        config.logo_sources = sources;
        config.logo_search_url = Some(format!("{}/search?q={{query}}", base));
        config.search_delay_ms = 0;
        config.encyclopedia_api_url = format!("{}/w/api.php", base);
        config
    }

    fn backfill(probe: ScriptedProbe, config: &Config) -> LogoBackfill<ScriptedProbe> {
        let fetcher = HttpFetcher::new("test", Duration::from_secs(5), RetryPolicy::none()).unwrap();
        LogoBackfill::new(prober(probe, 2), fetcher, config)
    }

    fn all_sources() -> Vec<LogoSource> {
        vec![
            LogoSource::Catalog,
            LogoSource::Search,
            LogoSource::Encyclopedia,
            LogoSource::Default,
        ]
    }

    #[test]
    fn test_has_valid_logo() {
        assert!(has_valid_logo("http://x/logo.png", DEFAULT));
        assert!(!has_valid_logo("", DEFAULT));
        assert!(!has_valid_logo("  ", DEFAULT));
        assert!(!has_valid_logo(DEFAULT, DEFAULT));
    }

    #[tokio::test]
    async fn test_existing_logo_is_never_overwritten() {
        let config = config("http://unused", all_sources());
        let mut backfill = backfill(ScriptedProbe::live(&["http://catalog/logo.png"]), &config);

        let mut channel = Channel::new("a", "A", "X");
        channel.logo_url = "http://mine/custom.png".into();

        assert!(!backfill.backfill(&mut channel, Some("http://catalog/logo.png")).await);
        assert_eq!(channel.logo_url, "http://mine/custom.png");
        assert!(backfill.prober_started().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_logo_wins_when_live() {
        let config = config("http://unused", all_sources());
        let mut backfill = backfill(ScriptedProbe::live(&["http://catalog/logo.png"]), &config);

        let mut channel = Channel::new("a", "A", "X");
        channel.logo_url = DEFAULT.into();

        assert!(backfill.backfill(&mut channel, Some("http://catalog/logo.png")).await);
        assert_eq!(channel.logo_url, "http://catalog/logo.png");
    }

    #[tokio::test]
    async fn test_falls_through_to_search() {
        let base = serve(lookup_app()).await;
        let config = config(&base, all_sources());
        let mut backfill = backfill(
            ScriptedProbe::live(&["http://img/search-hit.png", "http://img/wiki.png"]),
            &config,
        );

        let logo = backfill.resolve("Somoy TV", Some("http://catalog/dead.png")).await;
        assert_eq!(logo.as_deref(), Some("http://img/search-hit.png"));
    }

    #[tokio::test]
    async fn test_source_order_is_configurable() {
        let base = serve(lookup_app()).await;
        let config = config(
            &base,
            vec![LogoSource::Encyclopedia, LogoSource::Search, LogoSource::Default],
        );
        let mut backfill = backfill(
            ScriptedProbe::live(&["http://img/search-hit.png", "http://img/wiki.png"]),
            &config,
        );

        let logo = backfill.resolve("BTV", None).await;
        assert_eq!(logo.as_deref(), Some("http://img/wiki.png"));
    }

    #[tokio::test]
    async fn test_default_used_without_probe() {
        let base = serve(lookup_app()).await;
        let config = config(&base, all_sources());
        let mut backfill = backfill(ScriptedProbe::default(), &config);

        let mut channel = Channel::new("a", "A", "X");
        assert!(backfill.backfill(&mut channel, None).await);
        assert_eq!(channel.logo_url, DEFAULT);
        assert!(!backfill.prober_started().contains(&DEFAULT.to_string()));
    }

    #[tokio::test]
    async fn test_no_source_hits_leaves_logo_empty() {
        let config = config("http://unused", vec![LogoSource::Catalog]);
        let mut backfill = backfill(ScriptedProbe::default(), &config);

        let mut channel = Channel::new("a", "A", "X");
        assert!(!backfill.backfill(&mut channel, Some("http://catalog/dead.png")).await);
        assert_eq!(channel.logo_url, "");
    }

    impl LogoBackfill<ScriptedProbe> {
        fn prober_started(&self) -> Vec<String> {
            self.prober.probe().started()
        }
    }
}
