use serde::{Deserialize, Serialize};

/// A scheduled match mapped to the channels likely to carry it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub title: String,
    pub team1_logo: String,
    pub team2_logo: String,
    /// ISO-8601 UTC, e.g. "2026-10-18T09:30:00Z"
    #[serde(rename = "startTime")]
    pub start_time: String,
    pub tournament: String,
    #[serde(rename = "channelIds")]
    pub channel_ids: Vec<String>,
}

/// Contents of `events.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsDocument {
    pub events: Vec<ScheduledEvent>,
}

impl EventsDocument {
    pub fn to_pretty_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
