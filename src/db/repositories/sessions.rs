use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_kind, to_i64, to_u64},
    models::SessionRecord,
};

const SESSION_COLUMNS: &str = "id, start_time, end_time, duration, kind, date";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let duration: i64 = row.get("duration")?;
    let kind: String = row.get("kind")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        duration: to_u64(duration, "duration")?,
        kind: parse_kind(&kind)?,
        date: row.get("date")?,
    })
}

impl Database {
    /// Inserts the record, or replaces the stored one with the same id.
    pub async fn put_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, start_time, end_time, duration, kind, date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     start_time = excluded.start_time,
                     end_time = excluded.end_time,
                     duration = excluded.duration,
                     kind = excluded.kind,
                     date = excluded.date",
                params![
                    record.id,
                    record.start_time,
                    record.end_time,
                    to_i64(record.duration)?,
                    record.kind.as_str(),
                    record.date,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;

            Ok(session)
        })
        .await
    }

    /// Newest first, ordered by session start.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY start_time DESC, id DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }

    pub async fn clear_sessions(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM sessions", [])?;
            Ok(())
        })
        .await
    }
}
