use std::env;
use std::str::FromStr;

/// Which status codes count as a live probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Exactly 200
    Strict,
    /// Any 2xx or 3xx
    Lenient,
}

impl SuccessPolicy {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            SuccessPolicy::Strict => status == 200,
            SuccessPolicy::Lenient => (200..400).contains(&status),
        }
    }
}

impl FromStr for SuccessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "200" => Ok(Self::Strict),
            "lenient" | "2xx3xx" => Ok(Self::Lenient),
            other => Err(format!("unknown success policy '{}'", other)),
        }
    }
}

/// HTTP method used for a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    /// GET whose body is never read
    Get,
}

impl FromStr for ProbeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "head" => Ok(Self::Head),
            "get" => Ok(Self::Get),
            other => Err(format!("unknown probe method '{}'", other)),
        }
    }
}

/// Checker used by the link repair job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChecker {
    Http,
    Ffprobe,
}

impl FromStr for LinkChecker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "ffprobe" => Ok(Self::Ffprobe),
            other => Err(format!("unknown link checker '{}'", other)),
        }
    }
}

/// One step of the logo backfill chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoSource {
    Catalog,
    Search,
    Encyclopedia,
    Default,
}

impl FromStr for LogoSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "catalog" | "upstream" => Ok(Self::Catalog),
            "search" => Ok(Self::Search),
            "encyclopedia" | "wikipedia" => Ok(Self::Encyclopedia),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown logo source '{}'", other)),
        }
    }
}

/// Parse a comma-separated logo source list, dropping unknown entries and repeats
pub fn parse_logo_sources(raw: &str) -> Vec<LogoSource> {
    let mut sources = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        match part.parse::<LogoSource>() {
            Ok(source) if !sources.contains(&source) => sources.push(source),
            Ok(_) => {}
            Err(e) => tracing::warn!("Ignoring logo source: {}", e),
        }
    }
    sources
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Files
    pub categories_dir: String,
    pub playlists_dir: String,
    pub backup_dir: String,
    pub backup_keep: usize,
    pub summary_file: String,
    pub events_file: String,
    pub category_rules_file: Option<String>,

    // Catalog
    pub streams_api: String,
    pub channels_api: String,

    // HTTP
    pub user_agent: String,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,

    // Probing
    pub probe_concurrency: usize,
    pub probe_timeout_ms: u64,
    pub logo_probe_timeout_ms: u64,
    pub probe_success: SuccessPolicy,
    pub stream_probe_method: ProbeMethod,
    pub logo_probe_method: ProbeMethod,
    pub link_checker: LinkChecker,
    pub ffprobe_path: String,
    pub media_probe_timeout_ms: u64,
    pub max_candidates_per_channel: usize,
    pub max_streams_per_channel: Option<usize>,

    // Logos
    pub default_logo: String,
    pub logo_sources: Vec<LogoSource>,
    pub logo_search_url: Option<String>,
    pub search_delay_ms: u64,
    pub encyclopedia_api_url: String,

    // Alternate playlists
    pub playlist_source_base: String,
    pub playlist_sources: Vec<String>,

    // Classification
    pub openrouter_api_key: Option<String>,
    pub openrouter_api_url: String,
    pub llm_model: String,
    pub classify_delay_ms: u64,

    // Schedule
    pub schedule_url: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Files
            categories_dir: env_string("CATEGORIES_DIR", "categories"),
            playlists_dir: env_string("PLAYLISTS_DIR", "playlists"),
            backup_dir: env_string("BACKUP_DIR", "backups"),
            backup_keep: env_or("BACKUP_KEEP", 5),
            summary_file: env_string("SUMMARY_FILE", "run-summary.txt"),
            events_file: env_string("EVENTS_FILE", "events.json"),
            category_rules_file: env_optional("CATEGORY_RULES_FILE"),

            // Catalog
            streams_api: env_string("STREAMS_API", "https://iptv-org.github.io/api/streams.json"),
            channels_api: env_string(
                "CHANNELS_API",
                "https://iptv-org.github.io/api/channels.json",
            ),

            // HTTP - VLC user agent avoids IPTV server blocks
            user_agent: env_string("USER_AGENT", "VLC/3.0.20 LibVLC/3.0.20"),
            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", 30_000),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_base_ms: env_or("RETRY_BASE_MS", 500),
            retry_max_ms: env_or("RETRY_MAX_MS", 10_000),

            // Probing
            probe_concurrency: env_or("PROBE_CONCURRENCY", 10usize).max(1),
            probe_timeout_ms: env_or("PROBE_TIMEOUT_MS", 5_000),
            logo_probe_timeout_ms: env_or("LOGO_PROBE_TIMEOUT_MS", 2_000),
            probe_success: env_or("PROBE_SUCCESS", SuccessPolicy::Lenient),
            stream_probe_method: env_or("STREAM_PROBE_METHOD", ProbeMethod::Get),
            logo_probe_method: env_or("LOGO_PROBE_METHOD", ProbeMethod::Head),
            link_checker: env_or("LINK_CHECKER", LinkChecker::Ffprobe),
            ffprobe_path: env_string("FFPROBE_PATH", "ffprobe"),
            media_probe_timeout_ms: env_or("MEDIA_PROBE_TIMEOUT_MS", 10_000),
            max_candidates_per_channel: env_or("MAX_CANDIDATES_PER_CHANNEL", 10usize).max(1),
            max_streams_per_channel: env::var("MAX_STREAMS_PER_CHANNEL")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|n: &usize| *n > 0),

            // Logos
            default_logo: env_string(
                "DEFAULT_LOGO",
                "https://i.ibb.co/2Wn7bYf/now-rock-logo.png",
            ),
            logo_sources: parse_logo_sources(&env_string(
                "LOGO_SOURCES",
                "catalog,search,encyclopedia,default",
            )),
            logo_search_url: env_optional("LOGO_SEARCH_URL"),
            search_delay_ms: env_or("SEARCH_DELAY_MS", 1_000),
            encyclopedia_api_url: env_string(
                "ENCYCLOPEDIA_API_URL",
                "https://en.wikipedia.org/w/api.php",
            ),

            // Alternate playlists
            playlist_source_base: env_string(
                "PLAYLIST_SOURCE_BASE",
                "https://raw.githubusercontent.com/iptv-org/iptv/master/streams/",
            ),
            playlist_sources: split_list(&env_string(
                "PLAYLIST_SOURCES",
                "bd.m3u,in.m3u,uk.m3u,us.m3u,ca.m3u,au.m3u",
            )),

            // Classification
            openrouter_api_key: env_optional("OPENROUTER_API_KEY"),
            openrouter_api_url: env_string(
                "OPENROUTER_API_URL",
                "https://openrouter.ai/api/v1/chat/completions",
            ),
            llm_model: env_string("LLM_MODEL", "mistralai/mistral-7b-instruct:free"),
            classify_delay_ms: env_or("CLASSIFY_DELAY_MS", 2_000),

            // Schedule
            schedule_url: env_string(
                "SCHEDULE_URL",
                "https://www.cricbuzz.com/cricket-schedule/upcoming-series/international",
            ),
        }
    }

    /// Full URLs of the alternate playlist sources
    pub fn playlist_source_urls(&self) -> Vec<String> {
        self.playlist_sources
            .iter()
            .map(|file| {
                if file.starts_with("http://") || file.starts_with("https://") {
                    file.clone()
                } else {
                    format!("{}{}", self.playlist_source_base, file)
                }
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
