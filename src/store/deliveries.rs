use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::RecordStore;

/// One successfully delivered book. Rows are only ever inserted.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl RecordStore {
    /// Append one entry to the delivery log.
    pub async fn append_delivery_record(
        &self,
        user_id: i64,
        name: &str,
        size: u64,
    ) -> Result<DeliveryRecord> {
        let stored_size = i64::try_from(size).context("File size out of range")?;
        let created_at = Utc::now();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sent_books (telegram_id, book_name, file_size, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, name, stored_size, created_at],
        )
        .context("Failed to log delivery")?;

        Ok(DeliveryRecord {
            id: conn.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            size,
            created_at,
        })
    }

    /// All delivery records of a user, oldest first
    #[cfg(test)]
    pub async fn deliveries_for_user(&self, user_id: i64) -> Result<Vec<DeliveryRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, telegram_id, book_name, file_size, created_at
             FROM sent_books
             WHERE telegram_id = ?1
             ORDER BY id ASC",
        )?;

        let records = stmt
            .query_map(rusqlite::params![user_id], |row| {
                let size: i64 = row.get(3)?;
                Ok(DeliveryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    size: size.max(0) as u64,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load deliveries")?;

        Ok(records)
    }

    #[cfg(test)]
    pub async fn delivery_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row("SELECT count(*) FROM sent_books", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_list() {
        let store = RecordStore::open_in_memory().unwrap();
        store.set_destination(5, "me@kindle.com").await.unwrap();

        let first = store.append_delivery_record(5, "dune.epub", 1024).await.unwrap();
        let second = store.append_delivery_record(5, "emma.pdf", 2048).await.unwrap();
        assert!(second.id > first.id);

        let records = store.deliveries_for_user(5).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "dune.epub");
        assert_eq!(records[0].size, 1024);
        assert_eq!(records[1].user_id, 5);
        assert!(records[0].created_at <= records[1].created_at);
    }

    #[tokio::test]
    async fn test_append_does_not_require_user_row() {
        let store = RecordStore::open_in_memory().unwrap();

        let record = store.append_delivery_record(99, "x.pdf", 1).await.unwrap();
        assert_eq!(record.user_id, 99);
        assert_eq!(store.get_destination(99).await.unwrap(), None);
        assert_eq!(store.delivery_count().await.unwrap(), 1);
    }
}
