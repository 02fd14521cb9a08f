use std::convert::TryFrom;

use anyhow::{anyhow, Result};

use crate::db::models::SessionKind;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_kind(value: &str) -> Result<SessionKind> {
    match value {
        "FLOW" => Ok(SessionKind::Flow),
        "BREAK" => Ok(SessionKind::Break),
        other => Err(anyhow!("unknown session kind {other}")),
    }
}
