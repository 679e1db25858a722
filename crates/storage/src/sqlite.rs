use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grapefruit_models::{GrapefruitError, InfoHash, TorrentFile, TorrentMetadata};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

use crate::migrations;
use crate::store::TorrentStore;

const MAX_CONNECTIONS: u32 = 8;

pub struct SqliteTorrentStore {
    pool: SqlitePool,
}

impl SqliteTorrentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the database at `db_url` and applies the schema.
    pub async fn connect(db_url: &str) -> Result<Self, GrapefruitError> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        if let Some(parent) = options.clone().get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(db_url = %db_url, "Connecting to torrent database");
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TorrentStore for SqliteTorrentStore {
    async fn init(&self) -> Result<(), GrapefruitError> {
        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| GrapefruitError::DatabaseError { reason: e.to_string() })
    }

    async fn exists(&self, info_hash: &InfoHash) -> Result<bool, GrapefruitError> {
        let row = sqlx::query("SELECT 1 FROM torrents WHERE info_hash = ? LIMIT 1")
            .bind(info_hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    #[instrument(skip(self, torrent), fields(info_hash = %torrent.info_hash))]
    async fn insert(&self, torrent: &TorrentMetadata) -> Result<bool, GrapefruitError> {
        let files = serde_json::to_string(&torrent.files)
            .map_err(|e| GrapefruitError::DatabaseError { reason: format!("failed to encode files: {}", e) })?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO torrents (info_hash, name, files, total_length, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&torrent.info_hash)
        .bind(&torrent.name)
        .bind(files)
        .bind(torrent.total_length() as i64)
        .bind(torrent.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!("Torrent already stored");
        }
        Ok(inserted)
    }

    async fn get(&self, info_hash: &InfoHash) -> Result<Option<TorrentMetadata>, GrapefruitError> {
        let row = sqlx::query("SELECT info_hash, name, files, timestamp FROM torrents WHERE info_hash = ?")
            .bind(info_hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| torrent_from_row(&row)).transpose()
    }

    async fn count(&self) -> Result<u64, GrapefruitError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM torrents")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }
}

fn torrent_from_row(row: &SqliteRow) -> Result<TorrentMetadata, GrapefruitError> {
    let files: String = row.try_get("files")?;
    let files: Vec<TorrentFile> = serde_json::from_str(&files)
        .map_err(|e| GrapefruitError::DatabaseError { reason: format!("corrupt files column: {}", e) })?;
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| GrapefruitError::DatabaseError { reason: format!("corrupt timestamp column: {}", e) })?
        .with_timezone(&Utc);

    Ok(TorrentMetadata {
        info_hash: row.try_get("info_hash")?,
        name: row.try_get("name")?,
        files,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapefruit_models::Id20;
    use grapefruit_testsupport::temp_db_url;

    fn sample(byte: u8) -> TorrentMetadata {
        TorrentMetadata::new(
            &Id20::new([byte; 20]),
            format!("torrent-{}", byte),
            vec![
                TorrentFile { length: 10, path: vec!["a".to_string(), "b.txt".to_string()] },
                TorrentFile { length: 5, path: vec!["c.txt".to_string()] },
            ],
        )
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let (_dir, url) = temp_db_url().unwrap();
        let store = SqliteTorrentStore::connect(&url).await.unwrap();
        let torrent = sample(1);

        assert!(!store.exists(&Id20::new([1; 20])).await.unwrap());
        assert!(store.insert(&torrent).await.unwrap());
        assert!(store.exists(&Id20::new([1; 20])).await.unwrap());

        let loaded = store.get(&Id20::new([1; 20])).await.unwrap().unwrap();
        assert_eq!(loaded.name, torrent.name);
        assert_eq!(loaded.files, torrent.files);
        assert_eq!(loaded.timestamp.timestamp(), torrent.timestamp.timestamp());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_ignored() {
        let (_dir, url) = temp_db_url().unwrap();
        let store = SqliteTorrentStore::connect(&url).await.unwrap();

        assert!(store.insert(&sample(2)).await.unwrap());
        assert!(!store.insert(&sample(2)).await.unwrap());
        assert!(store.insert(&sample(3)).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let (_dir, url) = temp_db_url().unwrap();
        {
            let store = SqliteTorrentStore::connect(&url).await.unwrap();
            store.insert(&sample(4)).await.unwrap();
            store.pool().close().await;
        }
        let store = SqliteTorrentStore::connect(&url).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get(&Id20::new([5; 20])).await.unwrap().is_none());
    }
}
