//! `SQLite` implementation of [`HistoryStore`].

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use super::{add_platform_count, sort_platform_counts, DownloadStats, HistoryStore};
use crate::downloader::errors::StorageError;
use crate::downloader::models::{DownloadRecord, NewDownloadRecord};

/// Same layout as SQLite's CURRENT_TIMESTAMP, plus milliseconds
const WRITE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
const READ_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]");

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (or create) the database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        )
        .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                platform TEXT,
                title TEXT,
                quality TEXT,
                filesize INTEGER,
                success BOOLEAN,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                download_path TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

fn format_timestamp(ts: OffsetDateTime) -> Result<String, StorageError> {
    ts.format(WRITE_FORMAT)
        .map_err(|e| StorageError::Database(format!("timestamp format: {}", e)))
}

fn row_to_record(row: &SqliteRow) -> Result<DownloadRecord, StorageError> {
    let raw_ts: Option<String> = row.try_get("timestamp")?;
    let timestamp = raw_ts
        .as_deref()
        .and_then(|s| PrimitiveDateTime::parse(s, READ_FORMAT).ok())
        .map(PrimitiveDateTime::assume_utc)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);

    Ok(DownloadRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        platform: row.try_get::<Option<String>, _>("platform")?.unwrap_or_default(),
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        quality: row.try_get::<Option<String>, _>("quality")?.unwrap_or_default(),
        file_size_bytes: row.try_get::<Option<i64>, _>("filesize")?.unwrap_or(0).max(0) as u64,
        success: row.try_get::<Option<bool>, _>("success")?.unwrap_or(false),
        timestamp,
        path: row.try_get::<Option<String>, _>("download_path")?.unwrap_or_default(),
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn record(&self, entry: NewDownloadRecord) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO downloads
                (url, platform, title, quality, filesize, success, timestamp, download_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.url)
        .bind(&entry.platform)
        .bind(&entry.title)
        .bind(&entry.quality)
        .bind(entry.file_size_bytes as i64)
        .bind(entry.success)
        .bind(format_timestamp(OffsetDateTime::now_utc())?)
        .bind(&entry.path)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent(
        &self,
        limit: usize,
        platform: Option<&str>,
    ) -> Result<Vec<DownloadRecord>, StorageError> {
        let rows = match platform {
            Some(p) => {
                sqlx::query(
                    r#"
                    SELECT * FROM downloads
                    WHERE LOWER(platform) = LOWER(?)
                    ORDER BY timestamp DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(p)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM downloads ORDER BY timestamp DESC, id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }

    async fn total_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloads")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn statistics(&self) -> Result<DownloadStats, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0) AS success,
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS failed,
                COALESCE(SUM(CASE WHEN success = 1 THEN filesize ELSE 0 END), 0) AS total_bytes
            FROM downloads
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let platform_rows = sqlx::query(
            r#"
            SELECT COALESCE(platform, '') AS platform, COUNT(*) AS count
            FROM downloads
            GROUP BY COALESCE(platform, '')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_platform = Vec::with_capacity(platform_rows.len());
        for r in &platform_rows {
            let platform: String = r.try_get("platform")?;
            let count: i64 = r.try_get("count")?;
            add_platform_count(&mut by_platform, &platform, count as u64);
        }
        sort_platform_counts(&mut by_platform);

        Ok(DownloadStats {
            total: row.try_get::<i64, _>("total")? as u64,
            success: row.try_get::<i64, _>("success")? as u64,
            failed: row.try_get::<i64, _>("failed")? as u64,
            total_bytes: row.try_get::<i64, _>("total_bytes")?.max(0) as u64,
            by_platform,
        })
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM downloads").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_older_than(&self, days: u32) -> Result<u64, StorageError> {
        let cutoff = OffsetDateTime::now_utc() - Duration::days(i64::from(days));
        let result = sqlx::query("DELETE FROM downloads WHERE timestamp < ?")
            .bind(format_timestamp(cutoff)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
