//! Durable import tracking and the delivery read model.
//!
//! [`ImportStore`] owns every import lifecycle transition. Delivery rows are
//! written by the [`importer`](crate::importer), inside the same transaction
//! that calls [`mark_completed_on`].
//!
//! # Transitions
//!
//! | From | Operation | To |
//! |------|-----------|----|
//! | (none) | [`create_if_absent`](ImportStore::create_if_absent) | `pending` |
//! | `pending` | [`mark_failed`](ImportStore::mark_failed) | `pending` or `failed` |
//! | `pending` | [`mark_completed_on`] | `completed` |
//!
//! Every update is guarded by `state = 'pending'`, so terminal rows are
//! never touched again.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::fingerprint;
use crate::models::{DeliveryRecord, Import, ImportState};

const IMPORT_COLUMNS: &str =
    "id, source_path, content_hash, state, retry_count, created_at, completed_at";

/// Filters for listing stored deliveries.
#[derive(Debug, Clone)]
pub struct DeliveryQuery {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    /// Case-insensitive substring match on the location name.
    pub location: Option<String>,
    pub limit: i64,
}

impl Default for DeliveryQuery {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            location: None,
            limit: 100,
        }
    }
}

/// Import counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

impl StateCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.completed + self.failed
    }
}

#[derive(Clone)]
pub struct ImportStore {
    pool: SqlitePool,
}

impl ImportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record a newly discovered artifact unless its hash is already known.
    ///
    /// Returns `(created, id)`. When the hash exists, `created` is false and
    /// `id` is the existing import's id. A unique-constraint violation from a
    /// concurrent insert of the same hash is reported the same way.
    pub async fn create_if_absent(
        &self,
        source_path: &Path,
        hash: u64,
    ) -> Result<(bool, i64), PipelineError> {
        if let Some(id) = self.find_id_by_hash(hash).await? {
            return Ok((false, id));
        }

        let now = Utc::now().timestamp();
        let inserted = sqlx::query(
            r#"
            INSERT INTO imports (source_path, content_hash, state, retry_count, created_at)
            VALUES (?, ?, 'pending', 0, ?)
            "#,
        )
        .bind(source_path.to_string_lossy().to_string())
        .bind(fingerprint::to_db(hash))
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(result) => Ok((true, result.last_insert_rowid())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::debug!(hash = %format!("{:016x}", hash), "lost insert race for hash");
                let id = self
                    .find_id_by_hash(hash)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                Ok((false, id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_id_by_hash(&self, hash: u64) -> Result<Option<i64>, PipelineError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM imports WHERE content_hash = ?")
            .bind(fingerprint::to_db(hash))
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Pending imports that still have attempts left, oldest first.
    pub async fn list_eligible_pending(
        &self,
        max_retries: u32,
    ) -> Result<Vec<Import>, PipelineError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {IMPORT_COLUMNS}
            FROM imports
            WHERE state = 'pending' AND retry_count < ?
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(max_retries as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(import_from_row).collect()
    }

    /// Count one failed attempt against `id`.
    ///
    /// Returns the resulting state: `Failed` once the count reaches
    /// `max_retries`, `Pending` otherwise. A non-pending import is left alone
    /// and its current state is returned.
    pub async fn mark_failed(
        &self,
        id: i64,
        max_retries: u32,
    ) -> Result<ImportState, PipelineError> {
        sqlx::query(
            r#"
            UPDATE imports
            SET retry_count = retry_count + 1,
                state = CASE WHEN retry_count + 1 >= ? THEN 'failed' ELSE 'pending' END
            WHERE id = ? AND state = 'pending'
            "#,
        )
        .bind(max_retries as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let state: String = sqlx::query_scalar("SELECT state FROM imports WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        parse_state(&state)
    }

    /// Mark `id` completed outside of any delivery transaction.
    pub async fn mark_completed(&self, id: i64) -> Result<bool, PipelineError> {
        let mut conn = self.pool.acquire().await?;
        mark_completed_on(&mut *conn, id, Utc::now()).await
    }

    /// Most recently completed import, by completion time.
    pub async fn latest_completed(&self) -> Result<Option<Import>, PipelineError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {IMPORT_COLUMNS}
            FROM imports
            WHERE state = 'completed' AND completed_at IS NOT NULL
            ORDER BY completed_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(import_from_row).transpose()
    }

    pub async fn get_import(&self, id: i64) -> Result<Option<Import>, PipelineError> {
        let row = sqlx::query(&format!("SELECT {IMPORT_COLUMNS} FROM imports WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(import_from_row).transpose()
    }

    /// Imports newest first, optionally restricted to one state.
    pub async fn list_imports(
        &self,
        state: Option<ImportState>,
        limit: i64,
    ) -> Result<Vec<Import>, PipelineError> {
        let state_filter = state.map(|s| s.as_str());
        let rows = sqlx::query(&format!(
            r#"
            SELECT {IMPORT_COLUMNS}
            FROM imports
            WHERE (? IS NULL OR state = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(state_filter)
        .bind(state_filter)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(import_from_row).collect()
    }

    pub async fn count_by_state(&self) -> Result<StateCounts, PipelineError> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM imports GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StateCounts::default();
        for row in &rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            match parse_state(&state)? {
                ImportState::Pending => counts.pending = n,
                ImportState::Completed => counts.completed = n,
                ImportState::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    /// Stored deliveries, newest date first.
    pub async fn list_deliveries(
        &self,
        query: &DeliveryQuery,
    ) -> Result<Vec<DeliveryRecord>, PipelineError> {
        let since = query.since.map(|d| d.format("%Y-%m-%d").to_string());
        let until = query.until.map(|d| d.format("%Y-%m-%d").to_string());
        let location = query
            .location
            .as_ref()
            .map(|l| format!("%{}%", l.to_lowercase()));

        let rows = sqlx::query(
            r#"
            SELECT date, schedule, location_type, location_name
            FROM deliveries
            WHERE (? IS NULL OR date >= ?)
              AND (? IS NULL OR date <= ?)
              AND (? IS NULL OR lower(location_name) LIKE ?)
            ORDER BY date DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(since.as_deref())
        .bind(since.as_deref())
        .bind(until.as_deref())
        .bind(until.as_deref())
        .bind(location.as_deref())
        .bind(location.as_deref())
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(delivery_from_row).collect()
    }

    pub async fn count_deliveries(&self) -> Result<i64, PipelineError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

/// Transition `id` from pending to completed on `conn`.
///
/// Takes a bare connection so the caller can run it inside the transaction
/// that writes the import's deliveries. Returns false when the import was
/// not pending; the caller must then roll back.
pub async fn mark_completed_on(
    conn: &mut SqliteConnection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        "UPDATE imports SET state = 'completed', completed_at = ? WHERE id = ? AND state = 'pending'",
    )
    .bind(now.timestamp())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn parse_state(s: &str) -> Result<ImportState, PipelineError> {
    s.parse::<ImportState>()
        .map_err(|e| PipelineError::Storage(sqlx::Error::Decode(e.into())))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, PipelineError> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        PipelineError::Storage(sqlx::Error::Decode(
            format!("timestamp out of range: {}", secs).into(),
        ))
    })
}

fn import_from_row(row: &SqliteRow) -> Result<Import, PipelineError> {
    let source_path: String = row.try_get("source_path")?;
    let content_hash: i64 = row.try_get("content_hash")?;
    let state: String = row.try_get("state")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let created_at: i64 = row.try_get("created_at")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;

    Ok(Import {
        id: row.try_get("id")?,
        source_path: PathBuf::from(source_path),
        content_hash: fingerprint::from_db(content_hash),
        state: parse_state(&state)?,
        retry_count: retry_count.max(0) as u32,
        created_at: timestamp(created_at)?,
        completed_at: completed_at.map(timestamp).transpose()?,
    })
}

fn delivery_from_row(row: &SqliteRow) -> Result<DeliveryRecord, PipelineError> {
    let date: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| PipelineError::Storage(sqlx::Error::Decode(e.into())))?;

    Ok(DeliveryRecord {
        date,
        schedule: row.try_get("schedule")?,
        location_type: row.try_get("location_type")?,
        location_name: row.try_get("location_name")?,
    })
}
