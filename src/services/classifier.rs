use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::models::{FileSummary, RunSummary};
use crate::services::http::HttpFetcher;
use crate::services::links::events_file_name;
use crate::services::store::CategoryStore;

/// Labels the classifier may assign
pub const VALID_GENRES: [&str; 10] = [
    "Sports",
    "News",
    "Entertainment",
    "Movies",
    "Music",
    "Kids",
    "Informative",
    "Lifestyle",
    "Religion",
    "Unknown",
];

const REFERER: &str = "https://github.com/cybernahid-dev/StreamX-Ultra";
const APP_TITLE: &str = "StreamX IPTV Categorizer";

lazy_static! {
    // ============ NAME PATTERNS ============
    // Checked in order, first match wins
    static ref GENRE_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("Sports", Regex::new(r"(?i)\b(sports?|cricket|football|soccer|espn|willow|eurosport|bein|ptv\s*sports|t\s*sports|ten\s*\d)\b").unwrap()),
        ("News", Regex::new(r"(?i)\b(news|khabar|samachar|somoy|ekattor|jamuna|channel\s*24|dbc|cnn|al\s*jazeera|ndtv|aaj\s*tak)\b").unwrap()),
        ("Kids", Regex::new(r"(?i)\b(kids?|cartoon|nick(elodeon)?|pogo|baby\s*tv|duronto|junior|toons?)\b").unwrap()),
        ("Movies", Regex::new(r"(?i)\b(movies?|cinema|films?|hbo|cinemax|zee\s*cinema|star\s*gold)\b").unwrap()),
        ("Music", Regex::new(r"(?i)\b(music|mtv|vh1|9xm|gaan|radio)\b").unwrap()),
        ("Religion", Regex::new(r"(?i)\b(islamic|quran|peace\s*tv|madani|iqra|aastha|sanskar|bhakti|god\s*tv)\b").unwrap()),
        ("Informative", Regex::new(r"(?i)\b(discovery|nat(ional)?\s*geo(graphic)?|history|animal\s*planet|documentary|science|education)\b").unwrap()),
        ("Lifestyle", Regex::new(r"(?i)\b(food|travel|fashion|lifestyle|tlc|cooking)\b").unwrap()),
    ];
}

/// Genre from the channel name alone
pub fn classify_local(name: &str) -> Option<&'static str> {
    GENRE_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(name))
        .map(|(genre, _)| *genre)
}

/// First valid label contained in a model reply; "Unknown" counts as no answer
pub fn match_genre(reply: &str) -> Option<&'static str> {
    let reply = reply.to_lowercase();
    VALID_GENRES
        .iter()
        .find(|genre| reply.contains(&genre.to_lowercase()))
        .copied()
        .filter(|genre| *genre != "Unknown")
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

/// Chat-completion client for the genre prompt
pub struct LlmClassifier {
    fetcher: HttpFetcher,
    api_url: String,
    model: String,
    headers: HeaderMap,
}

impl LlmClassifier {
    pub fn new(fetcher: HttpFetcher, api_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .context("API key is not a valid header value")?,
        );
        headers.insert(HeaderName::from_static("http-referer"), HeaderValue::from_static(REFERER));
        headers.insert(HeaderName::from_static("x-title"), HeaderValue::from_static(APP_TITLE));

        Ok(Self {
            fetcher,
            api_url: api_url.to_string(),
            model: model.to_string(),
            headers,
        })
    }

    fn prompt(name: &str) -> String {
        format!(
            "Based on the TV channel name '{}', classify it into ONE of the following categories: {}. \
             Respond with only the single category name, nothing else.",
            name,
            VALID_GENRES.join(", ")
        )
    }

    /// `None` on errors, empty replies or "Unknown"
    pub async fn classify(&self, name: &str) -> Option<&'static str> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::prompt(name),
            }],
            temperature: 0.1,
        };

        match self
            .fetcher
            .post_json::<_, ChatResponse>(&self.api_url, self.headers.clone(), &request)
            .await
        {
            Ok(resp) => resp
                .choices
                .first()
                .and_then(|choice| match_genre(choice.message.content.trim())),
            Err(e) => {
                tracing::warn!(channel = name, error = %e, "classification request failed");
                None
            }
        }
    }
}

/// `genres` job over every category file
pub struct GenreJob {
    store: CategoryStore,
    remote: Option<LlmClassifier>,
    delay: Duration,
    exclude: String,
}

impl GenreJob {
    pub fn new(
        store: CategoryStore,
        remote: Option<LlmClassifier>,
        delay: Duration,
        exclude: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            delay,
            exclude: exclude.into(),
        }
    }

    /// Upper-cased label for `name`, local rules first
    async fn classify(&self, name: &str) -> Option<String> {
        if let Some(genre) = classify_local(name) {
            return Some(genre.to_uppercase());
        }

        let remote = self.remote.as_ref()?;
        let genre = remote.classify(name).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        genre.map(str::to_uppercase)
    }

    async fn process_file(&self, file: &str) -> Result<FileSummary> {
        let mut file_summary = FileSummary::new(file);
        let mut doc = self.store.load(file).await?;
        file_summary.total = doc.channels().len();
        tracing::info!(file = %file, channels = file_summary.total, "Processing file");

        for channel in doc.channels_mut().iter_mut().filter(|c| c.needs_genre()) {
            match self.classify(&channel.name).await {
                Some(genre) => {
                    tracing::debug!(channel = %channel.name, genre = %genre, "classified");
                    channel.genre = Some(genre);
                    file_summary.classified += 1;
                }
                None => tracing::debug!(channel = %channel.name, "could not classify"),
            }
        }

        // Files nothing was classified in keep their original bytes
        if file_summary.classified > 0 {
            file_summary.written = self.store.save(file, &doc).await?.is_written();
        }
        Ok(file_summary)
    }

    pub async fn run(&self, summary: &mut RunSummary) -> Result<()> {
        for file in self.store.list_files(&self.exclude).await? {
            match self.process_file(&file).await {
                Ok(file_summary) => summary.files.push(file_summary),
                Err(e) => {
                    tracing::error!(file = %file, error = %e, "genre update failed");
                    summary.note(format!("{}: {}", file, e));
                }
            }
        }
        Ok(())
    }
}

/// Entry point for the `genres` subcommand
pub async fn run(config: &Config, summary: &mut RunSummary) -> Result<()> {
    let store = CategoryStore::from_config(config);
    if !store.exists().await {
        bail!("Directory '{}' not found", store.dir().display());
    }

    let remote = match config.openrouter_api_key.as_deref() {
        Some(key) => Some(LlmClassifier::new(
            HttpFetcher::from_config(config)?,
            &config.openrouter_api_url,
            key,
            &config.llm_model,
        )?),
        None => {
            tracing::warn!("OPENROUTER_API_KEY is not set. AI classification will be skipped.");
            summary.note("remote classification skipped: no API key");
            None
        }
    };

    GenreJob::new(
        store,
        remote,
        Duration::from_millis(config.classify_delay_ms),
        events_file_name(config),
    )
    .run(summary)
    .await
}
