//! One-time import of the flat session list older versions kept in
//! `flow_sessions.json`.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::db::{Database, SessionRecord};

pub const LEGACY_FILE_NAME: &str = "flow_sessions.json";

/// Upserts every record from the legacy file into the ledger and removes the
/// file. Returns how many records were imported.
///
/// A missing file is a no-op. Content that is not a list of session records
/// is left on disk untouched so nothing is lost.
pub async fn import_legacy_sessions(db: &Database, path: &Path) -> Result<usize> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };

    let sessions: Vec<SessionRecord> = match serde_json::from_str(&contents) {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(
                "Skipping legacy import; {} is not a session list: {err}",
                path.display()
            );
            return Ok(0);
        }
    };

    for session in &sessions {
        db.put_session(session)
            .await
            .with_context(|| format!("failed to import legacy session {}", session.id))?;
    }

    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("failed to remove {}", path.display()))?;

    info!("Imported {} legacy sessions", sessions.len());
    Ok(sessions.len())
}
