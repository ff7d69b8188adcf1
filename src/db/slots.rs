use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::Database;

impl Database {
    pub async fn get_slot(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT value FROM storage_slots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read slot '{key}'"))
        })
        .await
    }

    pub async fn put_slot(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO storage_slots (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write slot '{key}'"))?;
            Ok(())
        })
        .await
    }

    pub async fn delete_slot(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM storage_slots WHERE key = ?1", params![key])
                .with_context(|| format!("failed to delete slot '{key}'"))?;
            Ok(())
        })
        .await
    }

    /// Moves whenever another connection commits to the file.
    pub async fn data_version(&self) -> Result<i64> {
        self.execute(|conn| {
            conn.pragma_query_value(None, "data_version", |row| row.get(0))
                .context("failed to read data_version pragma")
        })
        .await
    }
}
