//! `events` job: scrape upcoming cricket fixtures and map them to channels

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::config::Config;
use crate::models::{EventsDocument, FileSummary, RunSummary, ScheduledEvent};
use crate::services::http::HttpFetcher;
use crate::services::links::events_file_name;
use crate::services::store::{write_if_changed, CategoryStore};

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const DEFAULT_TOURNAMENT: &str = "International Match";
const DATE_FORMAT: &str = "%b %d, %Y %H:%M";

/// Keyword in title or tournament -> channel ids likely to carry it
const CHANNEL_MAPPING: &[(&str, &[&str])] = &[
    // Tournaments
    ("asia cup", &["gtv_bd", "tsports_bd", "star_sports_1_in"]),
    ("indian premier league", &["star_sports_1_in", "colors_in"]),
    ("the ashes", &["sky_sports_main_event_uk", "sony_ten_5_in", "willow_cricket_hd"]),
    ("t20 world cup", &["gtv_bd", "tsports_bd", "star_sports_1_in", "ptv_sports_pk", "willow_cricket_hd"]),
    ("odi world cup", &["gtv_bd", "tsports_bd", "star_sports_1_in", "ptv_sports_pk", "willow_cricket_hd"]),
    ("premier league", &["sky_sports_main_event_uk", "sky_sports_football_uk"]),
    ("champions league", &["bein_sports_1_hd", "sport_tv_1_pt"]),
    // Teams
    ("india", &["star_sports_1_in", "sony_ten_1_in", "dd_sports_in"]),
    ("bangladesh", &["gtv_bd", "tsports_bd"]),
    ("pakistan", &["ptv_sports_pk", "ten_sports_pk"]),
    ("england", &["sky_sports_main_event_uk"]),
    ("australia", &["fox_sports_au", "willow_cricket_hd"]),
];

const TEAM_LOGOS: &[(&str, &str)] = &[
    ("india", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172115/india.jpg"),
    ("pakistan", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172119/pakistan.jpg"),
    ("bangladesh", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172120/bangladesh.jpg"),
    ("australia", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172112/australia.jpg"),
    ("england", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172114/england.jpg"),
    ("south africa", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172117/south-africa.jpg"),
    ("new zealand", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172113/new-zealand.jpg"),
    ("sri lanka", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172118/sri-lanka.jpg"),
    ("afghanistan", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172121/afghanistan.jpg"),
    ("west indies", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172116/west-indies.jpg"),
    ("ireland", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172122/ireland.jpg"),
    ("zimbabwe", "https://www.cricbuzz.com/a/img/v1/25x25/i1/c172123/zimbabwe.jpg"),
];

lazy_static! {
    static ref CARD: Selector = Selector::parse("div.cb-sch-lst-row").unwrap();
    static ref TITLE: Selector = Selector::parse("a.text-hvr-underline").unwrap();
    static ref SERIES: Selector = Selector::parse("div.cb-font-12.text-gray").unwrap();
    static ref TIME: Selector = Selector::parse(r#"span[title="Time in GMT"]"#).unwrap();
    static ref DATE: Selector = Selector::parse("span.schedule-date").unwrap();
    static ref QUOTED: Regex = Regex::new(r"'(.*?)'").unwrap();
}

pub fn team_logo(team: &str) -> String {
    let team = team.to_lowercase();
    TEAM_LOGOS
        .iter()
        .find(|(key, _)| team.contains(key))
        .map(|(_, url)| url.to_string())
        .unwrap_or_default()
}

/// Known channel ids whose keywords appear in `text`, sorted
pub fn map_event_to_channels(text: &str, channels: &HashMap<String, String>) -> Vec<String> {
    let text = text.to_lowercase();
    let mut ids = BTreeSet::new();
    for (keyword, candidates) in CHANNEL_MAPPING {
        if text.contains(keyword) {
            ids.extend(
                candidates
                    .iter()
                    .filter(|id| channels.contains_key(**id))
                    .map(|id| id.to_string()),
            );
        }
    }
    ids.into_iter().collect()
}

fn element_text(card: &ElementRef, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn parse_card(card: &ElementRef, channels: &HashMap<String, String>) -> Option<ScheduledEvent> {
    let title = element_text(card, &TITLE).filter(|t| !t.is_empty())?;

    let fixture = title.split(',').next().unwrap_or_default();
    let teams: Vec<&str> = fixture.split(" vs ").map(str::trim).collect();
    if teams.len() < 2 {
        return None;
    }

    let tournament = element_text(card, &SERIES)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TOURNAMENT.to_string());

    let Some(time) = element_text(card, &TIME) else {
        tracing::debug!(title = %title, "match card has no time");
        return None;
    };
    let time = time.replace(" GMT", "");

    let date = card
        .select(&DATE)
        .next()
        .and_then(|el| el.value().attr("ng-if"))
        .and_then(|attr| QUOTED.captures(attr))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());
    let Some(date) = date else {
        tracing::debug!(title = %title, "match card has no date");
        return None;
    };

    let start = match NaiveDateTime::parse_from_str(&format!("{} {}", date, time.trim()), DATE_FORMAT) {
        Ok(dt) => dt,
        Err(e) => {
            tracing::warn!(title = %title, date = %date, time = %time, error = %e, "Could not parse a match card");
            return None;
        }
    };

    let channel_ids = map_event_to_channels(&format!("{} {}", title, tournament), channels);

    Some(ScheduledEvent {
        team1_logo: team_logo(teams[0]),
        team2_logo: team_logo(teams[1]),
        start_time: start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        tournament,
        channel_ids,
        title,
    })
}

/// Extract every parseable match card from a schedule page
pub fn parse_schedule(html: &str, channels: &HashMap<String, String>) -> Vec<ScheduledEvent> {
    let document = Html::parse_document(html);
    document
        .select(&CARD)
        .filter_map(|card| parse_card(&card, channels))
        .collect()
}

pub struct ScheduleJob {
    store: CategoryStore,
    fetcher: HttpFetcher,
    url: String,
    output: PathBuf,
    exclude: String,
}

impl ScheduleJob {
    pub fn new(store: CategoryStore, fetcher: HttpFetcher, url: &str, events_file: &str) -> Self {
        Self {
            output: store.path_for(events_file),
            store,
            fetcher,
            url: url.to_string(),
            exclude: events_file.to_string(),
        }
    }

    /// `id -> lower-cased name` across every category file
    async fn load_channel_names(&self) -> Result<HashMap<String, String>> {
        let mut names = HashMap::new();
        for file in self.store.list_files(&self.exclude).await? {
            match self.store.load(&file).await {
                Ok(doc) => {
                    for channel in doc.channels().iter().filter(|c| !c.id.is_empty()) {
                        names.insert(channel.id.clone(), channel.name.to_lowercase());
                    }
                }
                Err(e) => tracing::warn!(file = %file, error = %e, "Error reading channel file"),
            }
        }
        Ok(names)
    }

    pub async fn run(&self, summary: &mut RunSummary) -> Result<()> {
        let channels = self.load_channel_names().await?;
        if channels.is_empty() {
            bail!("Could not load any channel data. Cannot perform channel mapping.");
        }
        tracing::info!(channels = channels.len(), "channel data loaded for mapping");

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));

        let events = match self.fetcher.get_text_with_headers(&self.url, headers).await {
            Ok(html) => parse_schedule(&html, &channels),
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Error scraping schedule");
                summary.note(format!("schedule unavailable: {}", e));
                Vec::new()
            }
        };

        if events.is_empty() {
            tracing::info!("No events were scraped. The output file was not updated.");
            return Ok(());
        }
        tracing::info!(events = events.len(), "Successfully scraped and mapped events");

        let mut file_summary = FileSummary::new(&self.exclude);
        file_summary.total = events.len();
        let bytes = EventsDocument { events }.to_pretty_bytes()?;
        file_summary.written = write_if_changed(&self.output, &bytes).await?;
        summary.files.push(file_summary);
        Ok(())
    }
}

/// Entry point for the `events` subcommand
pub async fn run(config: &Config, summary: &mut RunSummary) -> Result<()> {
    let job = ScheduleJob::new(
        CategoryStore::from_config(config),
        HttpFetcher::from_config(config)?,
        &config.schedule_url,
        &events_file_name(config),
    );
    job.run(summary).await
}
