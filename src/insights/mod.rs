//! Session-history insights from an external text-generation service.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::db::{Database, MetadataKey, SessionKind, SessionRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub summary: String,
    pub recommendation: String,
    /// 0 to 100.
    pub focus_score: f64,
    pub best_time_of_day: String,
}

impl Insight {
    fn validate(self) -> Result<Self> {
        if !(0.0..=100.0).contains(&self.focus_score) {
            bail!("focus score {} outside 0..=100", self.focus_score);
        }
        if self.summary.trim().is_empty() {
            bail!("insight summary is empty");
        }
        Ok(self)
    }
}

/// The part of a session the generator gets to see.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionDigest {
    pub date: String,
    pub duration: u64,
    #[serde(rename = "type")]
    pub kind: SessionKind,
}

impl From<&SessionRecord> for SessionDigest {
    fn from(record: &SessionRecord) -> Self {
        Self {
            date: record.date.clone(),
            duration: record.duration,
            kind: record.kind,
        }
    }
}

#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn analyze(&self, sessions: &[SessionRecord]) -> Result<Insight>;
}

/// Posts `{"sessions": [...]}` to a JSON endpoint that answers with an
/// [`Insight`].
#[derive(Debug, Clone)]
pub struct HttpInsightGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    sessions: &'a [SessionDigest],
}

impl HttpInsightGenerator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

#[async_trait]
impl InsightGenerator for HttpInsightGenerator {
    async fn analyze(&self, sessions: &[SessionRecord]) -> Result<Insight> {
        let digests: Vec<SessionDigest> = sessions.iter().map(SessionDigest::from).collect();

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { sessions: &digests });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| anyhow!("network error while requesting insights: {error}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| anyhow!("failed reading insight response: {error}"))?;

        if !status.is_success() {
            bail!("insight service error: http {}; body={body}", status.as_u16());
        }

        let insight: Insight = serde_json::from_str(&body)
            .map_err(|error| anyhow!("invalid insight payload: {error}; body={body}"))?;
        insight.validate()
    }
}

/// Runs the generator against the ledger and keeps the last good answer.
pub struct InsightService {
    db: Database,
    generator: Option<Arc<dyn InsightGenerator>>,
    analyzing: AtomicBool,
}

impl InsightService {
    pub fn new(db: Database, generator: Option<Arc<dyn InsightGenerator>>) -> Self {
        Self {
            db,
            generator,
            analyzing: AtomicBool::new(false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.generator.is_some()
    }

    /// The stored insight, if any. Read failures count as "none".
    pub async fn latest(&self) -> Option<Insight> {
        match self.db.get_metadata::<Insight>(MetadataKey::Insights).await {
            Ok(insight) => insight,
            Err(err) => {
                warn!("Failed to load stored insights: {err:#}");
                None
            }
        }
    }

    /// Asks for a fresh analysis. Returns the new insight, or the previous one
    /// when there is nothing to analyze, an analysis is already running, or
    /// the generator fails.
    pub async fn refresh(&self) -> Option<Insight> {
        let Some(generator) = self.generator.clone() else {
            warn!("No insight service configured");
            return self.latest().await;
        };

        if self.analyzing.swap(true, Ordering::SeqCst) {
            info!("Insight analysis already in progress");
            return self.latest().await;
        }

        let result = self.run_analysis(generator.as_ref()).await;
        self.analyzing.store(false, Ordering::SeqCst);

        match result {
            Ok(Some(insight)) => Some(insight),
            Ok(None) => self.latest().await,
            Err(err) => {
                warn!("Insight analysis failed: {err:#}");
                self.latest().await
            }
        }
    }

    async fn run_analysis(&self, generator: &dyn InsightGenerator) -> Result<Option<Insight>> {
        let sessions = self.db.list_sessions().await?;
        if sessions.is_empty() {
            info!("No sessions to analyze");
            return Ok(None);
        }

        let insight = generator.analyze(&sessions).await?;
        if let Err(err) = self.db.set_metadata(MetadataKey::Insights, &insight).await {
            warn!("Failed to store insights: {err:#}");
        }
        Ok(Some(insight))
    }
}
