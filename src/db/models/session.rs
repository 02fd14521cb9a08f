//! Session ledger records.
//!
//! The JSON shape (`id`, `startTime`, `endTime`, `duration`, `type`, `date`)
//! is shared by the ledger, the legacy import file and the log relay wire
//! format, so field names must not drift.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionKind {
    Flow,
    Break,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Flow => "FLOW",
            SessionKind::Break => "BREAK",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub end_time: i64,
    /// Whole seconds.
    pub duration: u64,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub date: String,
}

impl SessionRecord {
    /// A finished flow session destined for the ledger.
    pub fn completed_flow(start_time: i64, end_time: i64, duration: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_time,
            end_time,
            duration,
            kind: SessionKind::Flow,
            date: iso_date(end_time),
        }
    }

    /// Progress of a flow session that is still running. Never stored in the
    /// ledger; the id is derived from the anchor and the snapshot instant.
    pub fn flow_snapshot(start_time: i64, snapshot_end: i64, duration: u64) -> Self {
        Self {
            id: format!("flow_{start_time}_{snapshot_end}"),
            start_time,
            end_time: snapshot_end,
            duration,
            kind: SessionKind::Flow,
            date: iso_date(snapshot_end),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start_time).single()
    }
}

pub fn iso_date(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
