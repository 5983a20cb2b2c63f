// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync-state persistence.
//!
//! One `sync_states` row per (entity, destination) pair records what was last
//! pushed: the destination-assigned remote id, the payload digest, when the
//! last successful push (or no-op check) happened, and the last failure.
//!
//! ```text
//! sync_states
//! ├── resource_type, resource_id   # owning entity (polymorphic, no FK)
//! ├── destination_name             # one row per destination
//! ├── remote_id                    # unique when present
//! ├── last_digest                  # digest of the last pushed payload
//! ├── last_synced_at               # unix millis, NULL = never synced
//! ├── last_error                   # cleared on next success
//! └── created_at, updated_at       # unix millis
//! ```
//!
//! # Transactions
//!
//! The synchronizer reads and writes state inside the transaction holding the
//! entity row lock, through [`find_in`] and [`save_in`]. Everything else goes
//! through [`SyncStateStore`], which retries SQLITE_BUSY/SQLITE_LOCKED with
//! capped exponential backoff.
//!
//! # Schema drift
//!
//! [`SyncStateStore::verify_schema`] runs at boot, ahead of any migration. An existing table without the
//! `destination_name` column is a configuration error; a missing table or an
//! unreachable database is tolerated so the check simply re-runs next boot.

use crate::error::{Result, SyncError};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, FromRow};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

const SELECT_COLUMNS: &str = "id, resource_type, resource_id, destination_name, remote_id, last_digest, \
     last_synced_at, last_error, created_at, updated_at";

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Whether a store error is worth retrying later (busy, pool exhaustion, IO).
pub fn is_transient_store_error(e: &sqlx::Error) -> bool {
    is_sqlite_busy_error(e)
        || matches!(
            e,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        )
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::store_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(operation = operation_name, attempts, "SQLite busy, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}

fn to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncState
// ═══════════════════════════════════════════════════════════════════════════════

/// Sync state of one entity for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Row id; `None` until first saved.
    pub id: Option<i64>,
    pub resource_type: String,
    pub resource_id: i64,
    pub destination_name: String,
    pub remote_id: Option<String>,
    pub last_digest: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Unsaved state for a pair that has never been synced.
    pub fn new(resource_type: impl Into<String>, resource_id: i64, destination_name: impl Into<String>) -> Self {
        Self {
            id: None,
            resource_type: resource_type.into(),
            resource_id,
            destination_name: destination_name.into(),
            remote_id: None,
            last_digest: None,
            last_synced_at: None,
            last_error: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// A push went through. A blank remote id keeps the previous one.
    pub fn record_success(&mut self, remote_id: Option<String>, digest: String, now: DateTime<Utc>) {
        if let Some(remote_id) = remote_id.filter(|r| !r.trim().is_empty()) {
            self.remote_id = Some(remote_id);
        }
        self.last_digest = Some(digest);
        self.last_synced_at = Some(now);
        self.last_error = None;
    }

    /// The payload was unchanged; only the check time moves.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_synced_at = Some(now);
    }

    /// A push failed. Prior successful fields stay as they were.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Remote id, if present and not blank.
    pub fn remote(&self) -> Option<&str> {
        self.remote_id.as_deref().filter(|r| !r.trim().is_empty())
    }
}

#[derive(FromRow)]
struct SyncStateRow {
    id: i64,
    resource_type: String,
    resource_id: i64,
    destination_name: String,
    remote_id: Option<String>,
    last_digest: Option<String>,
    last_synced_at: Option<i64>,
    last_error: Option<String>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
}

impl From<SyncStateRow> for SyncState {
    fn from(row: SyncStateRow) -> Self {
        Self {
            id: Some(row.id),
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            destination_name: row.destination_name,
            remote_id: row.remote_id,
            last_digest: row.last_digest,
            last_synced_at: from_millis(row.last_synced_at),
            last_error: row.last_error,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Transaction-scoped access
// ═══════════════════════════════════════════════════════════════════════════════

async fn find_with<'e, E>(executor: E, resource_type: &str, resource_id: i64, destination: &str) -> Result<Option<SyncState>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM sync_states WHERE resource_type = ? AND resource_id = ? AND destination_name = ?",
        SELECT_COLUMNS
    );
    let row: Option<SyncStateRow> = sqlx::query_as(&sql)
        .bind(resource_type)
        .bind(resource_id)
        .bind(destination)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(SyncState::from))
}

/// Find the state for a pair on an open connection or transaction.
pub(crate) async fn find_in(
    conn: &mut SqliteConnection,
    resource_type: &str,
    resource_id: i64,
    destination: &str,
) -> Result<Option<SyncState>> {
    find_with(conn, resource_type, resource_id, destination).await
}

/// Another state row already holding `remote_id`, as `type#id/destination`.
pub(crate) async fn remote_id_claimant(
    conn: &mut SqliteConnection,
    remote_id: &str,
    except_id: Option<i64>,
) -> Result<Option<String>> {
    let row: Option<(String, i64, String)> = sqlx::query_as(
        "SELECT resource_type, resource_id, destination_name FROM sync_states \
         WHERE remote_id = ? AND id IS NOT ? LIMIT 1",
    )
    .bind(remote_id)
    .bind(except_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(t, id, d)| format!("{}#{}/{}", t, id, d)))
}

/// Insert or update `state` on an open connection or transaction.
pub(crate) async fn save_in(conn: &mut SqliteConnection, state: &mut SyncState, now: DateTime<Utc>) -> Result<()> {
    let now_ms = now.timestamp_millis();
    match state.id {
        Some(id) => {
            sqlx::query(
                "UPDATE sync_states SET remote_id = ?, last_digest = ?, last_synced_at = ?, \
                 last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&state.remote_id)
            .bind(&state.last_digest)
            .bind(to_millis(state.last_synced_at))
            .bind(&state.last_error)
            .bind(now_ms)
            .bind(id)
            .execute(conn)
            .await?;
        }
        None => {
            let result = sqlx::query(
                "INSERT INTO sync_states (resource_type, resource_id, destination_name, remote_id, \
                 last_digest, last_synced_at, last_error, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&state.resource_type)
            .bind(state.resource_id)
            .bind(&state.destination_name)
            .bind(&state.remote_id)
            .bind(&state.last_digest)
            .bind(to_millis(state.last_synced_at))
            .bind(&state.last_error)
            .bind(now_ms)
            .bind(now_ms)
            .execute(conn)
            .await?;
            state.id = Some(result.last_insert_rowid());
            state.created_at = Some(now);
        }
    }
    state.updated_at = Some(now);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncStateStore
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool-backed access to `sync_states`.
#[derive(Debug, Clone)]
pub struct SyncStateStore {
    pool: SqlitePool,
}

impl SyncStateStore {
    /// Open (creating if needed) the application database at `path` in WAL mode.
    pub async fn connect(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Opening sync state store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| SyncError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (shared with the application).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create `sync_states` and its indexes if missing.
    ///
    /// An existing table is checked with [`verify_schema`](Self::verify_schema)
    /// first, so drift surfaces as a configuration error rather than a failed
    /// index build.
    pub async fn migrate(&self) -> Result<()> {
        self.verify_schema().await?;

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS sync_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_type TEXT NOT NULL,
                resource_id INTEGER NOT NULL,
                destination_name TEXT NOT NULL,
                remote_id TEXT,
                last_digest TEXT,
                last_synced_at INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS index_sync_states_on_resource_and_destination \
             ON sync_states (resource_type, resource_id, destination_name)",
            "CREATE UNIQUE INDEX IF NOT EXISTS index_sync_states_on_remote_id \
             ON sync_states (remote_id) WHERE remote_id IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS index_sync_states_on_last_synced_at \
             ON sync_states (last_synced_at)",
        ];

        let pool = &self.pool;
        for statement in statements {
            execute_with_retry("state_migrate", || async { sqlx::query(statement).execute(pool).await }).await?;
        }
        info!("Sync state table ready");
        Ok(())
    }

    /// Boot-time schema drift check.
    pub async fn verify_schema(&self) -> Result<()> {
        let columns: Vec<(String,)> =
            match sqlx::query_as("SELECT name FROM pragma_table_info('sync_states')")
                .fetch_all(&self.pool)
                .await
            {
                Ok(columns) => columns,
                Err(e) => {
                    warn!(error = %e, "Skipping sync state schema check, database not ready");
                    return Ok(());
                }
            };

        if columns.is_empty() {
            debug!("sync_states table not created yet, skipping schema check");
            return Ok(());
        }
        if !columns.iter().any(|(name,)| name == "destination_name") {
            return Err(SyncError::Config(
                "sync_states is missing the destination_name column; \
                 run the state table migration before syncing"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// State for one pair, if it has ever been saved.
    pub async fn find(&self, resource_type: &str, resource_id: i64, destination: &str) -> Result<Option<SyncState>> {
        find_with(&self.pool, resource_type, resource_id, destination).await
    }

    /// Saved state for the pair, or a fresh unsaved one.
    pub async fn find_or_init(&self, resource_type: &str, resource_id: i64, destination: &str) -> Result<SyncState> {
        Ok(self
            .find(resource_type, resource_id, destination)
            .await?
            .unwrap_or_else(|| SyncState::new(resource_type, resource_id, destination)))
    }

    /// Every destination's state for one entity, ordered by destination.
    pub async fn list_for_resource(&self, resource_type: &str, resource_id: i64) -> Result<Vec<SyncState>> {
        let sql = format!(
            "SELECT {} FROM sync_states WHERE resource_type = ? AND resource_id = ? ORDER BY destination_name",
            SELECT_COLUMNS
        );
        let rows: Vec<SyncStateRow> = sqlx::query_as(&sql)
            .bind(resource_type)
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(SyncState::from).collect())
    }

    /// Save outside a sync transaction.
    pub async fn save(&self, state: &mut SyncState) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        save_in(&mut conn, state, Utc::now()).await
    }

    /// Delete every state row of a destroyed entity. Returns rows removed.
    pub async fn purge_resource(&self, resource_type: &str, resource_id: i64) -> Result<u64> {
        let pool = &self.pool;
        let result = execute_with_retry("state_purge", || async {
            sqlx::query("DELETE FROM sync_states WHERE resource_type = ? AND resource_id = ?")
                .bind(resource_type)
                .bind(resource_id)
                .execute(pool)
                .await
        })
        .await?;

        debug!(
            resource_type = %resource_type,
            resource_id,
            removed = result.rows_affected(),
            "Purged sync states"
        );
        Ok(result.rows_affected())
    }

    /// Close the pool after checkpointing the WAL.
    pub async fn close(&self) {
        let pool = &self.pool;
        if let Err(e) = execute_with_retry("state_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await
        {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Sync state store closed");
    }
}
