//! Devotional feed, aggregate statistics and usage counters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::rest::RestClient;
use crate::ApiError;

const ENTRIES: &str = "rest/v1/daily_bible";
const SUBSCRIBERS: &str = "rest/v1/push_subscribers";
const RPC_INCREMENT_VIEW: &str = "rest/v1/rpc/increment_view";
const RPC_INCREMENT_PLAY: &str = "rest/v1/rpc/increment_play";

/// Row identifier; the backend may use integer or text keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Int(id) => write!(f, "{}", id),
            EntryId::Text(id) => f.write_str(id),
        }
    }
}

/// One day's devotional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevotionalEntry {
    pub id: EntryId,
    pub date: NaiveDate,
    pub verse_reference: String,
    pub verse_text: String,
    pub exposition: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub play_count: Option<u64>,
}

impl DevotionalEntry {
    pub fn views(&self) -> u64 {
        self.view_count.unwrap_or(0)
    }

    pub fn plays(&self) -> u64 {
        self.play_count.unwrap_or(0)
    }
}

/// Totals shown in the stats bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub total_views: u64,
    pub total_plays: u64,
    /// `None` when the subscriber count could not be read.
    pub total_subscribers: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CounterRow {
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    play_count: Option<u64>,
}

#[derive(Serialize)]
struct RowRef<'a> {
    row_id: &'a EntryId,
}

/// Read side of the devotional feed plus the counter RPCs.
#[derive(Debug, Clone)]
pub struct ContentClient {
    rest: RestClient,
}

impl ContentClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Newest entries first, one page.
    pub async fn latest(&self) -> Result<Vec<DevotionalEntry>, ApiError> {
        let limit = self.rest.config().page_size.to_string();
        let entries: Vec<DevotionalEntry> = self
            .rest
            .get_json(ENTRIES, &[("order", "date.desc"), ("limit", &limit)])
            .await?;
        info!(count = entries.len(), "Loaded devotional entries");
        Ok(entries)
    }

    /// Load the feed and count a view for the newest entry.
    pub async fn load_feed(&self) -> Result<Vec<DevotionalEntry>, ApiError> {
        let entries = self.latest().await?;
        if let Some(newest) = entries.first() {
            self.record_view(newest.id.clone());
        }
        Ok(entries)
    }

    /// Sum of all view/play counters and the subscriber count.
    pub async fn stats(&self) -> Result<Stats, ApiError> {
        let rows: Vec<CounterRow> = self
            .rest
            .get_json(ENTRIES, &[("select", "view_count,play_count")])
            .await?;

        let total_subscribers = match self
            .rest
            .get_json::<Vec<serde_json::Value>>(SUBSCRIBERS, &[("select", "id")])
            .await
        {
            Ok(subscribers) => Some(subscribers.len()),
            Err(err) => {
                warn!(error = %err, "Subscriber count unavailable");
                None
            }
        };

        Ok(Stats {
            total_views: rows.iter().map(|r| r.view_count.unwrap_or(0)).sum(),
            total_plays: rows.iter().map(|r| r.play_count.unwrap_or(0)).sum(),
            total_subscribers,
        })
    }

    pub async fn increment_view(&self, id: &EntryId) -> Result<(), ApiError> {
        self.rest
            .post_json(RPC_INCREMENT_VIEW, &RowRef { row_id: id }, None)
            .await
    }

    pub async fn increment_play(&self, id: &EntryId) -> Result<(), ApiError> {
        self.rest
            .post_json(RPC_INCREMENT_PLAY, &RowRef { row_id: id }, None)
            .await
    }

    /// Count a view in the background; failures are only logged.
    pub fn record_view(&self, id: EntryId) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(err) = client.increment_view(&id).await {
                error!(%id, error = %err, "Error incrementing view");
            }
        })
    }

    /// Count an audio play in the background; failures are only logged.
    pub fn record_play(&self, id: EntryId) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(err) = client.increment_play(&id).await {
                error!(%id, error = %err, "Error incrementing play");
            }
        })
    }
}

/// Compact a counter for display: `999`, `1.2K`, `3.4M`.
pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
