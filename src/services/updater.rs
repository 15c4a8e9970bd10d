//! `update` job: filter the catalog into category files
//!
//! Categories are processed one at a time. For each one every candidate URL
//! is probed in a single bounded phase, then the coordinating task merges the
//! results into the existing records.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::models::{
    sort_channels, Catalog, CatalogChannel, CategoryRules, Channel, FileSummary, FilterRule,
    RunSummary,
};
use crate::services::catalog::fetch_catalog;
use crate::services::http::HttpFetcher;
use crate::services::logo::LogoBackfill;
use crate::services::playlist::render_m3u;
use crate::services::prober::{HttpProbe, Probe, ReachabilityProber};
use crate::services::store::{write_if_changed, CategoryStore};

const ALL_PLAYLIST: &str = "all.m3u";

/// Catalog streams matched by one rule, grouped per channel id
struct Matched<'a> {
    channel: &'a CatalogChannel,
    urls: Vec<String>,
}

pub struct Updater<P> {
    store: CategoryStore,
    rules: CategoryRules,
    prober: ReachabilityProber<P>,
    logos: LogoBackfill<P>,
    playlists_dir: PathBuf,
    max_candidates: usize,
    max_streams: Option<usize>,
}

impl<P: Probe> Updater<P> {
    pub fn new(
        config: &Config,
        store: CategoryStore,
        rules: CategoryRules,
        prober: ReachabilityProber<P>,
        logos: LogoBackfill<P>,
    ) -> Self {
        Self {
            store,
            rules,
            prober,
            logos,
            playlists_dir: PathBuf::from(&config.playlists_dir),
            max_candidates: config.max_candidates_per_channel.max(1),
            max_streams: config.max_streams_per_channel,
        }
    }

    /// Process every rule against `catalog`
    pub async fn run(&mut self, catalog: &Catalog, summary: &mut RunSummary) -> Result<()> {
        let rules: Vec<FilterRule> = self.rules.iter().cloned().collect();
        let mut all_channels = Vec::new();
        let mut all_ids = HashSet::new();

        for rule in &rules {
            tracing::info!(file = %rule.file_key, "Processing category");

            let (file_summary, channels) = self
                .process_category(rule, catalog)
                .await
                .with_context(|| format!("Failed to update {}", rule.file_key))?;

            let stem = Path::new(&rule.file_key)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| rule.file_key.clone());
            let playlist = self.playlists_dir.join(format!("{}.m3u", stem));
            write_if_changed(&playlist, render_m3u(&channels).as_bytes()).await?;

            tracing::info!(
                file = %rule.file_key,
                total = file_summary.total,
                added = file_summary.added,
                updated = file_summary.updated,
                written = file_summary.written,
                "category done"
            );
            summary.files.push(file_summary);
            // A channel matched by several rules is listed once in the combined playlist
            all_channels.extend(channels.into_iter().filter(|c| all_ids.insert(c.id.clone())));
        }

        let all = self.playlists_dir.join(ALL_PLAYLIST);
        write_if_changed(&all, render_m3u(&all_channels).as_bytes()).await?;
        Ok(())
    }

    /// Merge one category; returns its counters and the final channel list
    async fn process_category(
        &mut self,
        rule: &FilterRule,
        catalog: &Catalog,
    ) -> Result<(FileSummary, Vec<Channel>)> {
        let mut file_summary = FileSummary::new(&rule.file_key);
        let doc = self.store.load_or_empty(&rule.file_key).await;

        // First occurrence wins if a hand-edited file repeats an id
        let mut seen = HashSet::new();
        let mut channels: Vec<Channel> = doc
            .channels()
            .iter()
            .filter(|c| seen.insert(c.id.clone()))
            .cloned()
            .collect();
        let index: HashMap<String, usize> = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        let matched = match_rule(rule, catalog);

        // ============ Candidates ============
        let mut candidates: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (id, m) in &matched {
            let existing = index.get(*id).map(|&i| channels[i].stream_urls.as_slice());
            candidates.insert(
                *id,
                build_candidates(existing.unwrap_or_default(), &m.urls, self.max_candidates),
            );
        }

        let mut distinct = Vec::new();
        let mut queued = HashSet::new();
        for urls in candidates.values() {
            for url in urls {
                if queued.insert(url.as_str()) {
                    distinct.push(url.clone());
                }
            }
        }

        // ============ Probe ============
        tracing::info!(
            file = %rule.file_key,
            channels = matched.len(),
            candidates = distinct.len(),
            "probing stream candidates"
        );
        let live: HashSet<String> = self.prober.probe_all(&distinct).await.into_iter().collect();

        // ============ Merge ============
        for (id, m) in &matched {
            let mut live_urls: Vec<String> = candidates[*id]
                .iter()
                .filter(|u| live.contains(u.as_str()))
                .cloned()
                .collect();
            if live_urls.is_empty() {
                continue;
            }
            if let Some(cap) = self.max_streams {
                live_urls.truncate(cap);
            }

            match index.get(*id) {
                Some(&i) => {
                    let before = channels[i].clone();
                    let channel = &mut channels[i];
                    apply_catalog(channel, m.channel, rule, live_urls);
                    self.logos.backfill(channel, m.channel.logo.as_deref()).await;
                    if *channel != before {
                        file_summary.updated += 1;
                    }
                }
                None => {
                    let mut channel =
                        Channel::new(m.channel.id.clone(), m.channel.display_name(), &rule.category_label);
                    apply_catalog(&mut channel, m.channel, rule, live_urls);
                    self.logos.backfill(&mut channel, m.channel.logo.as_deref()).await;
                    channels.push(channel);
                    file_summary.added += 1;
                }
            }
        }

        sort_channels(&mut channels);
        file_summary.total = channels.len();

        let outcome = self
            .store
            .save(&rule.file_key, &doc.with_channels(channels.clone()))
            .await?;
        file_summary.written = outcome.is_written();

        Ok((file_summary, channels))
    }
}

/// Catalog channels matching `rule` with their deduplicated stream URLs
fn match_rule<'a>(rule: &FilterRule, catalog: &'a Catalog) -> BTreeMap<&'a str, Matched<'a>> {
    let mut matched: BTreeMap<&str, Matched> = BTreeMap::new();
    for (channel, url) in catalog.joined_streams() {
        if !rule.matches(channel) {
            continue;
        }
        let entry = matched.entry(channel.id.as_str()).or_insert_with(|| Matched {
            channel,
            urls: Vec::new(),
        });
        if !entry.urls.iter().any(|u| u == url) {
            entry.urls.push(url.to_string());
        }
    }
    matched
}

/// Existing URLs first, then catalog URLs not already present.
///
/// Each group is capped at `max` on its own, so a file full of stale URLs
/// never keeps the catalog alternates from being probed.
pub fn build_candidates(existing: &[String], catalog: &[String], max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    push_unique(&mut out, existing, max);
    push_unique(&mut out, catalog, max);
    out
}

fn push_unique(out: &mut Vec<String>, urls: &[String], max: usize) {
    let mut taken = 0;
    for url in urls {
        if taken >= max {
            break;
        }
        let url = url.trim();
        if url.is_empty() || out.iter().any(|u| u == url) {
            continue;
        }
        out.push(url.to_string());
        taken += 1;
    }
}

fn apply_catalog(channel: &mut Channel, source: &CatalogChannel, rule: &FilterRule, live_urls: Vec<String>) {
    channel.stream_urls = live_urls;
    channel.name = source.display_name().to_string();
    if source.languages.is_some() {
        channel.languages = source.languages.clone();
    }
    channel.category = rule.category_label.clone();
    if rule.is_genre_rule() && channel.needs_genre() {
        channel.genre = Some(rule.category_label.to_uppercase());
    }
}

/// Entry point for the `update` subcommand
pub async fn run(config: &Config, summary: &mut RunSummary) -> Result<()> {
    let rules = match &config.category_rules_file {
        Some(path) => CategoryRules::from_file(Path::new(path))?,
        None => CategoryRules::default(),
    };
    tracing::info!(rules = rules.len(), "category rules loaded");

    let fetcher = HttpFetcher::from_config(config)?;
    let catalog = fetch_catalog(&fetcher, config).await?;
    summary.note(format!(
        "catalog: {} channels, {} streams",
        catalog.channels.len(),
        catalog.streams.len()
    ));

    let stream_probe = HttpProbe::new(
        &config.user_agent,
        Duration::from_millis(config.probe_timeout_ms),
        config.stream_probe_method,
        config.probe_success,
    )
    .context("Failed to build stream probe client")?;
    let logo_probe = HttpProbe::new(
        &config.user_agent,
        Duration::from_millis(config.logo_probe_timeout_ms),
        config.logo_probe_method,
        config.probe_success,
    )
    .context("Failed to build logo probe client")?;

    let stream_prober = ReachabilityProber::new(
        stream_probe,
        config.probe_concurrency,
        Duration::from_millis(config.probe_timeout_ms),
    );
    let logo_prober = ReachabilityProber::new(
        logo_probe,
        config.probe_concurrency,
        Duration::from_millis(config.logo_probe_timeout_ms),
    );

    let mut updater = Updater::new(
        config,
        CategoryStore::from_config(config),
        rules,
        stream_prober,
        LogoBackfill::new(logo_prober, fetcher, config),
    );
    updater.run(&catalog, summary).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogoSource;
    use crate::models::{CatalogStream, CategoryDocument};
    use crate::services::http::RetryPolicy;
    use crate::services::prober::testing::{prober, ScriptedProbe};
    use crate::services::store::{BackupPolicy, SaveOutcome};
    use tempfile::TempDir;
    use tokio::fs;

    const DEFAULT: &str = "http://default/logo.png";

    fn catalog_channel(id: &str, country: &str, categories: &[&str], logo: Option<&str>) -> CatalogChannel {
        CatalogChannel {
            id: id.into(),
            name: Some(id.to_uppercase()),
            country: Some(country.into()),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            logo: logo.map(str::to_string),
            ..Default::default()
        }
    }

    fn stream(channel: &str, url: &str) -> CatalogStream {
        CatalogStream {
            channel: Some(channel.into()),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    fn test_catalog() -> Catalog {
        Catalog::new(
            vec![
                catalog_channel("x", "IN", &["news"], Some("http://logo/x.png")),
                catalog_channel("bd1", "BD", &["sports"], None),
                catalog_channel("y", "IN", &["sports"], None),
            ],
            vec![
                stream("x", "http://live/x.m3u8"),
                stream("bd1", "http://live/bd1.m3u8"),
                stream("y", "http://dead/y.m3u8"),
                stream("y", "http://live/y.m3u8"),
            ],
        )
    }

    fn live_probe() -> ScriptedProbe {
        ScriptedProbe::live(&[
            "http://live/x.m3u8",
            "http://live/bd1.m3u8",
            "http://live/y.m3u8",
            "http://logo/x.png",
        ])
    }

    struct Fixture {
        tmp: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let mut config = Config::from_env();
            config.categories_dir = tmp.path().join("categories").to_string_lossy().to_string();
            config.playlists_dir = tmp.path().join("playlists").to_string_lossy().to_string();
            config.backup_dir = tmp.path().join("backups").to_string_lossy().to_string();
            config.backup_keep = 3;
            config.default_logo = DEFAULT.into();
            config.logo_sources = vec![LogoSource::Catalog, LogoSource::Default];
            config.max_candidates_per_channel = 10;
            config.max_streams_per_channel = None;
            Self { tmp, config }
        }

        fn rules() -> CategoryRules {
            CategoryRules::new(vec![
                FilterRule::country("india.json", "IN", "India"),
                FilterRule::country("bangladesh.json", "BD", "Bangladesh"),
                FilterRule::genres("sports.json", &["Sports"], "Sports"),
            ])
        }

        fn updater(&self, probe: fn() -> ScriptedProbe) -> Updater<ScriptedProbe> {
            let fetcher =
                HttpFetcher::new("test", Duration::from_secs(1), RetryPolicy::none()).unwrap();
            Updater::new(
                &self.config,
                CategoryStore::from_config(&self.config),
                Self::rules(),
                prober(probe(), 4),
                LogoBackfill::new(prober(probe(), 2), fetcher, &self.config),
            )
        }

        fn category(&self, name: &str) -> PathBuf {
            Path::new(&self.config.categories_dir).join(name)
        }

        async fn write_category(&self, name: &str, json: &str) {
            fs::create_dir_all(&self.config.categories_dir).await.unwrap();
            fs::write(self.category(name), json).await.unwrap();
        }

        async fn read_category(&self, name: &str) -> Vec<Channel> {
            let text = fs::read_to_string(self.category(name)).await.unwrap();
            serde_json::from_str::<CategoryDocument>(&text)
                .unwrap()
                .into_channels()
        }

        async fn run(&self, probe: fn() -> ScriptedProbe) -> RunSummary {
            let mut summary = RunSummary::start("update");
            self.updater(probe)
                .run(&test_catalog(), &mut summary)
                .await
                .unwrap();
            summary
        }
    }

    fn find<'a>(channels: &'a [Channel], id: &str) -> Option<&'a Channel> {
        channels.iter().find(|c| c.id == id)
    }

    #[test]
    fn test_build_candidates() {
        let existing = vec!["http://a/1".to_string(), "deadurl".to_string()];
        let catalog = vec!["http://a/1".to_string(), "http://b/2".to_string(), "http://c/3".to_string()];

        assert_eq!(
            build_candidates(&existing, &catalog, 10),
            vec!["http://a/1", "deadurl", "http://b/2", "http://c/3"]
        );
        // Catalog URLs get their own budget
        assert_eq!(
            build_candidates(&existing, &catalog, 1),
            vec!["http://a/1", "http://b/2"]
        );
    }

    #[tokio::test]
    async fn test_full_set_of_dead_urls_still_gets_catalog_alternate() {
        let fx = Fixture::new();
        let dead: Vec<String> = (0..fx.config.max_candidates_per_channel)
            .map(|n| format!("\"http://dead/{}.m3u8\"", n))
            .collect();
        fx.write_category(
            "india.json",
            &format!(
                r#"{{"channels":[{{"id":"x","name":"X","logoUrl":"","streamUrls":[{}]}}]}}"#,
                dead.join(",")
            ),
        )
        .await;

        fx.run(live_probe).await;

        let india = fx.read_category("india.json").await;
        assert_eq!(find(&india, "x").unwrap().stream_urls, vec!["http://live/x.m3u8"]);
    }

    #[tokio::test]
    async fn test_dead_url_replaced_by_live_alternate() {
        let fx = Fixture::new();
        fx.write_category(
            "india.json",
            r#"{"channels":[{"id":"x","name":"X","logoUrl":"","streamUrls":["deadurl"]}]}"#,
        )
        .await;

        let summary = fx.run(live_probe).await;

        let india = fx.read_category("india.json").await;
        let x = find(&india, "x").unwrap();
        assert_eq!(x.stream_urls, vec!["http://live/x.m3u8"]);
        assert_eq!(x.category, "India");
        assert_eq!(x.logo_url, "http://logo/x.png");
        assert_eq!(summary.files[0].updated, 1);
    }

    #[tokio::test]
    async fn test_country_rules_do_not_leak() {
        let fx = Fixture::new();
        fx.run(live_probe).await;

        let india = fx.read_category("india.json").await;
        let bangladesh = fx.read_category("bangladesh.json").await;

        assert!(find(&india, "bd1").is_none());
        assert!(find(&bangladesh, "bd1").is_some());
        assert!(find(&bangladesh, "x").is_none());
    }

    #[tokio::test]
    async fn test_genre_rule_sets_genre_and_uses_live_urls_only() {
        let fx = Fixture::new();
        fx.run(live_probe).await;

        let sports = fx.read_category("sports.json").await;
        let ids: Vec<_> = sports.iter().map(|c| c.id.as_str()).collect();
        // Sorted by name: "BD1" < "Y"
        assert_eq!(ids, vec!["bd1", "y"]);

        let y = find(&sports, "y").unwrap();
        assert_eq!(y.stream_urls, vec!["http://live/y.m3u8"]);
        assert_eq!(y.genre.as_deref(), Some("SPORTS"));
        assert_eq!(y.logo_url, DEFAULT);
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let fx = Fixture::new();
        fx.write_category(
            "india.json",
            r#"{"channels":[{"id":"x","name":"X","logoUrl":"","streamUrls":["deadurl"]}]}"#,
        )
        .await;

        fx.run(live_probe).await;
        let first = fs::read(fx.category("india.json")).await.unwrap();
        let first_m3u = fs::read(fx.tmp.path().join("playlists/all.m3u")).await.unwrap();

        let summary = fx.run(live_probe).await;
        let second = fs::read(fx.category("india.json")).await.unwrap();
        let second_m3u = fs::read(fx.tmp.path().join("playlists/all.m3u")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first_m3u, second_m3u);
        assert_eq!(summary.files_written(), 0);
        assert!(summary.files.iter().all(|f| f.updated == 0 && f.added == 0));

        // Only the first run's overwrite of the seeded file was backed up
        let backups = fx.tmp.path().join("backups").join("india");
        let mut entries = fs::read_dir(&backups).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_existing_logo_kept() {
        let fx = Fixture::new();
        fx.write_category(
            "india.json",
            r#"{"channels":[{"id":"x","name":"X","logoUrl":"http://mine/x.png","streamUrls":[]}]}"#,
        )
        .await;

        fx.run(live_probe).await;

        let india = fx.read_category("india.json").await;
        assert_eq!(find(&india, "x").unwrap().logo_url, "http://mine/x.png");
    }

    #[tokio::test]
    async fn test_stale_and_unreachable_channels_are_kept() {
        let fx = Fixture::new();
        fx.write_category(
            "india.json",
            r#"{"channels":[
                {"id":"gone","name":"Gone","logoUrl":"","streamUrls":["http://old/gone.m3u8"],"note":"manual"},
                {"id":"x","name":"X","logoUrl":"","streamUrls":["deadurl"]}
            ]}"#,
        )
        .await;

        // Nothing is live this time
        let summary = fx.run(ScriptedProbe::default).await;

        let india = fx.read_category("india.json").await;
        let gone = find(&india, "gone").unwrap();
        assert_eq!(gone.stream_urls, vec!["http://old/gone.m3u8"]);
        assert_eq!(gone.extra.get("note").and_then(|v| v.as_str()), Some("manual"));
        assert_eq!(find(&india, "x").unwrap().stream_urls, vec!["deadurl"]);
        assert!(find(&india, "y").is_none());
        assert_eq!(summary.files[0].added, 0);
    }

    #[tokio::test]
    async fn test_playlists_written() {
        let fx = Fixture::new();
        fx.run(live_probe).await;

        let india = fs::read_to_string(fx.tmp.path().join("playlists/india.m3u")).await.unwrap();
        let all = fs::read_to_string(fx.tmp.path().join("playlists/all.m3u")).await.unwrap();

        assert!(india.starts_with("#EXTM3U\n"));
        assert!(india.contains("http://live/x.m3u8"));
        assert!(!india.contains("http://live/bd1.m3u8"));
        assert!(all.contains("http://live/bd1.m3u8"));
        assert!(all.contains("http://live/x.m3u8"));
    }

    #[tokio::test]
    async fn test_combined_playlist_lists_each_channel_once() {
        let fx = Fixture::new();
        fx.run(live_probe).await;

        // "y" matches both the india and sports rules
        let india = fx.read_category("india.json").await;
        let sports = fx.read_category("sports.json").await;
        assert!(find(&india, "y").is_some());
        assert!(find(&sports, "y").is_some());

        let all = fs::read_to_string(fx.tmp.path().join("playlists/all.m3u")).await.unwrap();
        assert_eq!(all.matches("tvg-id=\"y\"").count(), 1);
        assert_eq!(all.matches("http://live/y.m3u8").count(), 1);
    }

    #[tokio::test]
    async fn test_streams_capped_per_channel() {
        let mut fx = Fixture::new();
        fx.config.max_streams_per_channel = Some(1);
        fx.write_category(
            "india.json",
            r#"[{"id":"x","name":"X","logoUrl":"http://mine/x.png","streamUrls":["http://live/y.m3u8"]}]"#,
        )
        .await;

        let mut summary = RunSummary::start("update");
        fx.updater(live_probe)
            .run(&test_catalog(), &mut summary)
            .await
            .unwrap();

        let text = fs::read_to_string(fx.category("india.json")).await.unwrap();
        assert!(text.trim_start().starts_with('['));
        let india = fx.read_category("india.json").await;
        assert_eq!(find(&india, "x").unwrap().stream_urls, vec!["http://live/y.m3u8"]);
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_rewritten() {
        let fx = Fixture::new();
        fx.run(live_probe).await;

        let store = CategoryStore::new(
            &fx.config.categories_dir,
            BackupPolicy {
                dir: fx.tmp.path().join("backups"),
                keep: 3,
            },
        );
        let doc = store.load("bangladesh.json").await.unwrap();
        assert_eq!(
            store.save("bangladesh.json", &doc).await.unwrap(),
            SaveOutcome::Unchanged
        );
    }
}
