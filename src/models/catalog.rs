use serde::Deserialize;
use std::collections::HashMap;

/// Channel entry from the upstream `channels.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub logo: Option<String>,
    /// Date the channel went off air, if it has
    #[serde(default)]
    pub closed: Option<String>,
}

impl CatalogChannel {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Unknown")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.as_deref().map_or(false, |d| !d.trim().is_empty())
    }
}

/// Stream entry from the upstream `streams.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogStream {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Older catalog revisions carry "online"/"offline"/"blocked"
    #[serde(default)]
    pub status: Option<String>,
}

impl CatalogStream {
    /// Streams without a status are considered usable
    pub fn is_online(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("online"))
            .unwrap_or(true)
    }
}

/// Both catalog documents joined on channel id
#[derive(Debug, Default)]
pub struct Catalog {
    pub channels: HashMap<String, CatalogChannel>,
    pub streams: Vec<CatalogStream>,
}

impl Catalog {
    pub fn new(channels: Vec<CatalogChannel>, streams: Vec<CatalogStream>) -> Self {
        let channels = channels
            .into_iter()
            .filter(|c| !c.id.is_empty())
            .map(|c| (c.id.clone(), c))
            .collect();
        Self { channels, streams }
    }

    /// Online streams whose channel exists in the channel list and is still
    /// on air, as `(channel, url)` pairs in catalog order
    pub fn joined_streams(&self) -> impl Iterator<Item = (&CatalogChannel, &str)> {
        self.streams.iter().filter_map(move |stream| {
            if !stream.is_online() {
                return None;
            }
            let id = stream.channel.as_deref()?;
            let url = stream.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
            let channel = self.channels.get(id).filter(|c| !c.is_closed())?;
            Some((channel, url))
        })
    }
}
