use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;

use super::RecordStore;

impl RecordStore {
    /// Look up the Kindle address configured for a user.
    /// `Ok(None)` means the user never configured one.
    pub async fn get_destination(&self, user_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT kindle_email FROM users WHERE telegram_id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up destination")
    }

    /// Insert or overwrite the user's Kindle address. Callers validate first.
    pub async fn set_destination(&self, user_id: i64, destination: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (telegram_id, kindle_email, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(telegram_id) DO UPDATE SET kindle_email = excluded.kindle_email",
            rusqlite::params![user_id, destination, Utc::now()],
        )
        .context("Failed to store destination")?;
        Ok(())
    }
}
