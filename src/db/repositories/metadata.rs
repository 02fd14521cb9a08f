use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use crate::db::{connection::Database, models::MetadataKey};

impl Database {
    /// Reads a metadata slot. A missing slot is `Ok(None)`; a slot whose JSON
    /// no longer matches `T` is an error so callers can decide what to do.
    pub async fn get_metadata<T>(&self, key: MetadataKey) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM metadata WHERE key = ?1",
                    params![key.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match raw {
                Some(raw) => {
                    let value = serde_json::from_str(&raw).with_context(|| {
                        format!("metadata '{}' holds malformed JSON", key.as_str())
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn set_metadata<T>(&self, key: MetadataKey, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("failed to encode metadata '{}'", key.as_str()))?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key.as_str(), encoded],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_metadata(&self, key: MetadataKey) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM metadata WHERE key = ?1",
                params![key.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn clear_metadata(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM metadata", [])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::models::MetadataKey;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_get_and_overwrite() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("meta.sqlite3")).unwrap();

        assert_eq!(
            db.get_metadata::<f64>(MetadataKey::BreakRatio).await.unwrap(),
            None
        );

        db.set_metadata(MetadataKey::BreakRatio, &0.25).await.unwrap();
        db.set_metadata(MetadataKey::BreakRatio, &0.2).await.unwrap();
        assert_eq!(
            db.get_metadata::<f64>(MetadataKey::BreakRatio).await.unwrap(),
            Some(0.2)
        );
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("meta.sqlite3")).unwrap();

        db.set_metadata(MetadataKey::LastFlowDuration, &1500u64)
            .await
            .unwrap();
        db.set_metadata(MetadataKey::Insights, &json!({ "summary": "ok" }))
            .await
            .unwrap();

        db.delete_metadata(MetadataKey::LastFlowDuration).await.unwrap();
        assert_eq!(
            db.get_metadata::<u64>(MetadataKey::LastFlowDuration)
                .await
                .unwrap(),
            None
        );

        db.clear_metadata().await.unwrap();
        assert_eq!(
            db.get_metadata::<serde_json::Value>(MetadataKey::Insights)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn mismatched_type_is_an_error() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("meta.sqlite3")).unwrap();

        db.set_metadata(MetadataKey::ActiveTimer, &json!("not a timer"))
            .await
            .unwrap();
        assert!(db
            .get_metadata::<u64>(MetadataKey::ActiveTimer)
            .await
            .is_err());
    }
}
