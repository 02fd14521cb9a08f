use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::db::SessionRecord;

/// Which stream a record belongs to on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    /// A completed session.
    Session,
    /// Progress of a session that is still running.
    Snapshot,
}

impl RelayEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayEvent::Session => "session",
            RelayEvent::Snapshot => "snapshot",
        }
    }
}

/// Outbound log of session records. Callers treat every error as
/// non-fatal.
#[async_trait]
pub trait LogRelay: Send + Sync {
    async fn send(&self, event: RelayEvent, record: &SessionRecord) -> Result<()>;
}

/// Used when no relay URL is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRelay;

#[async_trait]
impl LogRelay for DisabledRelay {
    async fn send(&self, _event: RelayEvent, _record: &SessionRecord) -> Result<()> {
        Ok(())
    }
}

/// Posts records as JSON to `<base_url>/session` and `<base_url>/snapshot`.
#[derive(Debug, Clone)]
pub struct HttpLogRelay {
    client: Client,
    base_url: String,
}

impl HttpLogRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            bail!("relay url must not be empty");
        }
        Ok(Self {
            client: Client::new(),
            base_url: trimmed.to_string(),
        })
    }

    pub fn endpoint(&self, event: RelayEvent) -> String {
        format!("{}/{}", self.base_url, event.as_str())
    }
}

#[async_trait]
impl LogRelay for HttpLogRelay {
    async fn send(&self, event: RelayEvent, record: &SessionRecord) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(event))
            .json(record)
            .send()
            .await
            .map_err(|error| anyhow!("network error while relaying {}: {error}", event.as_str()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "log relay rejected {} {}: http {}; body={body}",
                event.as_str(),
                record.id,
                status.as_u16()
            );
        }
        Ok(())
    }
}
