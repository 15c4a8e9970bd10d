use anyhow::{anyhow, bail, Result};
use futures::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

use crate::models::Channel;
use crate::services::http::HttpFetcher;

// Limits for streamed parsing
const MAX_LINE_BYTES: usize = 32 * 1024;
const READ_LINE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PLAYLIST_BYTES: u64 = 64 * 1024 * 1024;
const MAX_SOURCE_ENTRIES: usize = 200_000;

/// Size caps applied to one alternate playlist
#[derive(Debug, Clone, Copy)]
struct SourceLimits {
    max_bytes: u64,
    max_entries: usize,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            max_bytes: MAX_PLAYLIST_BYTES,
            max_entries: MAX_SOURCE_ENTRIES,
        }
    }
}

lazy_static! {
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"(\w+(?:-\w+)*)="([^"]*)""#).unwrap();
}

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    attributes: HashMap<String, String>,
    title: String,
}

/// Channel name -> stream URLs gathered from alternate playlists
pub type SourceLinks = BTreeMap<String, Vec<String>>;

/// Split an EXTINF line into its attributes and title
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let content = line.strip_prefix("#EXTINF:")?;

    // Attribute values may contain commas, so the title is after the last one
    let last_comma = content.rfind(',')?;
    let header = &content[..last_comma];
    let title = content[last_comma + 1..].trim().to_string();

    let mut attributes = HashMap::new();
    for caps in ATTR_REGEX.captures_iter(header) {
        let key = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let value = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        attributes.insert(key, value);
    }

    Some(ExtinfData { attributes, title })
}

/// Strip trailing tags like "(720p)" or "[Geo-blocked]" off a playlist title
pub fn clean_channel_name(title: &str) -> String {
    title.split('(').next().unwrap_or("").trim().to_string()
}

/// Incremental EXTINF/URL pairing shared by the text and streamed parsers
#[derive(Default)]
struct SourceCollector {
    links: SourceLinks,
    pending: Option<String>,
    entries: usize,
}

impl SourceCollector {
    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if trimmed.starts_with("#EXTINF:") {
            self.pending = parse_extinf(trimmed).and_then(|extinf| {
                let name = clean_channel_name(&extinf.title);
                if !name.is_empty() {
                    return Some(name);
                }
                // Untitled entries fall back to tvg-name
                extinf
                    .attributes
                    .get("tvg-name")
                    .map(|n| clean_channel_name(n))
                    .filter(|n| !n.is_empty())
            });
            return;
        }

        // #EXTVLCOPT and friends sit between EXTINF and the URL
        if trimmed.starts_with('#') {
            return;
        }

        if let Some(name) = self.pending.take() {
            let urls = self.links.entry(name).or_default();
            if !urls.iter().any(|u| u == trimmed) {
                urls.push(trimmed.to_string());
                self.entries += 1;
            }
        }
    }

    fn finish(self) -> SourceLinks {
        self.links
    }
}

/// Parse playlist text into name -> URLs
pub fn parse_source_playlist(text: &str) -> SourceLinks {
    let mut collector = SourceCollector::default();
    for line in text.lines() {
        collector.feed(line);
    }
    collector.finish()
}

/// Streamed variant of [`parse_source_playlist`] with line, byte and entry limits
async fn parse_source_reader<R: AsyncBufRead + Unpin>(
    mut reader: R,
    limits: SourceLimits,
) -> Result<SourceLinks> {
    let mut collector = SourceCollector::default();
    let mut line = String::new();
    let mut total_bytes: u64 = 0;

    loop {
        line.clear();

        let bytes_read = match tokio::time::timeout(READ_LINE_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => bail!("Timed out while reading playlist line"),
        };

        if bytes_read == 0 {
            break;
        }

        if line.len() > MAX_LINE_BYTES {
            bail!("Playlist line exceeds max length of {} bytes", MAX_LINE_BYTES);
        }

        total_bytes += bytes_read as u64;
        if total_bytes > limits.max_bytes {
            bail!("Playlist exceeds max size of {} bytes", limits.max_bytes);
        }

        collector.feed(&line);
        if collector.entries > limits.max_entries {
            bail!("Playlist exceeds max of {} entries", limits.max_entries);
        }
    }

    Ok(collector.finish())
}

/// Fetch and parse one playlist source
async fn fetch_source(fetcher: &HttpFetcher, url: &str) -> Result<SourceLinks> {
    let response = fetcher.get(url).await?;
    let limits = SourceLimits::default();

    if let Some(len) = response.content_length() {
        if len > limits.max_bytes {
            bail!(
                "Playlist too large: {:.1}MB (limit {}MB)",
                len as f64 / 1024f64 / 1024f64,
                limits.max_bytes / 1024 / 1024
            );
        }
    }

    let bytes_stream = response.bytes_stream();
    let stream_reader = StreamReader::new(
        bytes_stream.map(|result| result.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    );

    parse_source_reader(BufReader::new(stream_reader), limits).await
}

/// Fetch every source concurrently and merge by channel name.
///
/// Failing sources contribute nothing; an error is returned only when no
/// source yields any channel.
pub async fn fetch_source_links(fetcher: &HttpFetcher, urls: &[String]) -> Result<SourceLinks> {
    tracing::info!(sources = urls.len(), "Fetching alternate playlist sources");

    let results = join_all(urls.iter().map(|url| async move {
        (url, fetch_source(fetcher, url).await)
    }))
    .await;

    let mut merged = SourceLinks::new();
    for (url, result) in results {
        match result {
            Ok(links) => {
                tracing::info!(source = %url, channels = links.len(), "playlist source parsed");
                merge_links(&mut merged, links);
            }
            Err(e) => tracing::warn!(source = %url, error = %e, "playlist source failed"),
        }
    }

    if merged.is_empty() {
        return Err(anyhow!("Could not fetch any source links"));
    }
    tracing::info!("Total unique channels fetched from sources: {}", merged.len());
    Ok(merged)
}

/// Append `other` into `into`, keeping first-seen URL order per name
pub fn merge_links(into: &mut SourceLinks, other: SourceLinks) {
    for (name, urls) in other {
        let entry = into.entry(name).or_default();
        for url in urls {
            if !entry.contains(&url) {
                entry.push(url);
            }
        }
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('"', "'")
}

/// Render channels as an M3U playlist, one entry per stream URL
pub fn render_m3u<'a>(channels: impl IntoIterator<Item = &'a Channel>) -> String {
    let mut out = String::from("#EXTM3U\n");
    for channel in channels {
        for url in &channel.stream_urls {
            let _ = write!(out, "#EXTINF:-1 tvg-id=\"{}\"", escape_attr(&channel.id));
            if !channel.logo_url.is_empty() {
                let _ = write!(out, " tvg-logo=\"{}\"", escape_attr(&channel.logo_url));
            }
            let _ = writeln!(
                out,
                " group-title=\"{}\",{}",
                escape_attr(&channel.category),
                channel.name
            );
            let _ = writeln!(out, "{}", url);
        }
    }
    out
}
