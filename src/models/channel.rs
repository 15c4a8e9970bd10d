use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Single channel record inside a category file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logo_url: String,
    /// Ordered, deduplicated
    #[serde(default)]
    pub stream_urls: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    /// Fields we don't model are carried through rewrites untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            logo_url: String::new(),
            stream_urls: Vec::new(),
            category: category.into(),
            genre: None,
            languages: None,
            extra: Map::new(),
        }
    }

    /// Append a stream URL unless already present
    pub fn push_stream(&mut self, url: &str) -> bool {
        if url.is_empty() || self.stream_urls.iter().any(|u| u == url) {
            return false;
        }
        self.stream_urls.push(url.to_string());
        true
    }

    /// True when the genre is missing or the "Unknown" placeholder
    pub fn needs_genre(&self) -> bool {
        match self.genre.as_deref() {
            None => true,
            Some(g) => g.trim().is_empty() || g.trim().eq_ignore_ascii_case("unknown"),
        }
    }
}

/// On-disk shape of a category file.
///
/// Most files are `{"channels": [...]}` but hand-edited ones can be a bare
/// array; the shape read is the shape written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryDocument {
    Wrapped { channels: Vec<Channel> },
    Bare(Vec<Channel>),
}

impl Default for CategoryDocument {
    fn default() -> Self {
        Self::Wrapped {
            channels: Vec::new(),
        }
    }
}

impl CategoryDocument {
    pub fn channels(&self) -> &[Channel] {
        match self {
            Self::Wrapped { channels } | Self::Bare(channels) => channels,
        }
    }

    pub fn channels_mut(&mut self) -> &mut Vec<Channel> {
        match self {
            Self::Wrapped { channels } | Self::Bare(channels) => channels,
        }
    }

    pub fn into_channels(self) -> Vec<Channel> {
        match self {
            Self::Wrapped { channels } | Self::Bare(channels) => channels,
        }
    }

    /// Replace the channel list keeping the document shape
    pub fn with_channels(&self, channels: Vec<Channel>) -> Self {
        match self {
            Self::Wrapped { .. } => Self::Wrapped { channels },
            Self::Bare(_) => Self::Bare(channels),
        }
    }

    /// Pretty JSON with two-space indent, non-ASCII left unescaped
    pub fn to_pretty_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Stable ordering used for every category file
pub fn sort_channels(channels: &mut [Channel]) {
    channels.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}
