//! # ClickMine Store
//!
//! SQLite persistence behind semantic operations: account sessions,
//! resolved entities, per-account statistics and the rolling rate
//! counters. Callers never see SQL. Failures are logged with the
//! operation and its arguments, then re-raised; they are never
//! swallowed here.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use clickmine_core::types::PeerKind;
use clickmine_core::{MinerError, Result};

/// Rolling window of the channel-join counter.
const JOIN_WINDOW_SECS: i64 = 60 * 60;
/// Rolling window of the entity-resolution counter.
const REQUEST_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Stored account session credentials.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub phone: String,
    pub api_id: i64,
    pub api_hash: String,
    pub token: String,
}

/// A resolved entity pinned to the account that resolved it.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub phone: String,
    pub handle: String,
    pub id: i64,
    pub access_hash: i64,
    pub kind: PeerKind,
}

/// Per-account lifetime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatisticsRecord {
    pub phone: String,
    pub earned: f64,
    pub completed_tasks: i64,
    pub skipped_tasks: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating directories and schema as needed) the database at
    /// `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MinerError::Store(format!("open {}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MinerError::Store(format!("open in-memory: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL keeps readers from blocking the write path; harmless to
        // skip on databases that do not support it.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT NOT NULL UNIQUE,
                api_id INTEGER NOT NULL,
                api_hash TEXT NOT NULL,
                token TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS entities (
                phone TEXT NOT NULL,
                handle TEXT NOT NULL,
                id INTEGER NOT NULL,
                access_hash INTEGER NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (phone, handle)
            );

            CREATE TABLE IF NOT EXISTS statistics (
                phone TEXT PRIMARY KEY,
                earned REAL NOT NULL DEFAULT 0,
                completed_tasks INTEGER NOT NULL DEFAULT 0,
                skipped_tasks INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS joined_channels (
                phone TEXT PRIMARY KEY,
                joined_count INTEGER NOT NULL DEFAULT 0,
                last_joined_at INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS entity_requests (
                phone TEXT PRIMARY KEY,
                requests_count INTEGER NOT NULL DEFAULT 0,
                last_request_at INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(|e| fail("migrate", "", e))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MinerError::Store(format!("connection lock poisoned: {e}")))
    }

    // ---- sessions ----

    pub fn sessions(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT phone, api_id, api_hash, token FROM sessions ORDER BY id")
            .map_err(|e| fail("sessions", "", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionRecord {
                    phone: row.get(0)?,
                    api_id: row.get(1)?,
                    api_hash: row.get(2)?,
                    token: row.get(3)?,
                })
            })
            .map_err(|e| fail("sessions", "", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| fail("sessions", "", e))
    }

    pub fn session(&self, phone: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT phone, api_id, api_hash, token FROM sessions WHERE phone = ?1",
            [phone],
            |row| {
                Ok(SessionRecord {
                    phone: row.get(0)?,
                    api_id: row.get(1)?,
                    api_hash: row.get(2)?,
                    token: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| fail("session", phone, e))
    }

    /// Register an account. The statistics row and both rate-counter
    /// rows are seeded in the same transaction so a registered account
    /// can never be observed without them.
    pub fn create_session(
        &self,
        phone: &str,
        api_id: i64,
        api_hash: &str,
        token: &str,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| fail("create_session", phone, e))?;
        tx.execute(
            "INSERT INTO sessions (phone, api_id, api_hash, token) VALUES (?1, ?2, ?3, ?4)",
            params![phone, api_id, api_hash, token],
        )
        .map_err(|e| fail("create_session", phone, e))?;
        tx.execute("INSERT OR IGNORE INTO statistics (phone) VALUES (?1)", [phone])
            .map_err(|e| fail("create_session", phone, e))?;
        tx.execute(
            "INSERT OR IGNORE INTO joined_channels (phone) VALUES (?1)",
            [phone],
        )
        .map_err(|e| fail("create_session", phone, e))?;
        tx.execute(
            "INSERT OR IGNORE INTO entity_requests (phone) VALUES (?1)",
            [phone],
        )
        .map_err(|e| fail("create_session", phone, e))?;
        tx.commit().map_err(|e| fail("create_session", phone, e))
    }

    // ---- entities ----

    pub fn entity(&self, phone: &str, handle: &str) -> Result<Option<EntityRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, access_hash, kind FROM entities WHERE phone = ?1 AND handle = ?2",
                params![phone, handle],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| fail("entity", &format!("{phone} {handle}"), e))?;
        match row {
            None => Ok(None),
            Some((id, access_hash, kind)) => {
                let kind = PeerKind::parse(&kind).ok_or_else(|| {
                    MinerError::Store(format!("unknown entity kind '{kind}' for {handle}"))
                })?;
                Ok(Some(EntityRecord {
                    phone: phone.to_string(),
                    handle: handle.to_string(),
                    id,
                    access_hash,
                    kind,
                }))
            }
        }
    }

    /// Persist a resolution. The id and kind of a known handle never
    /// change; a refreshed access hash overwrites the stored one.
    pub fn save_entity(&self, entity: &EntityRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entities (phone, handle, id, access_hash, kind)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(phone, handle) DO UPDATE SET access_hash = excluded.access_hash",
            params![
                entity.phone,
                entity.handle,
                entity.id,
                entity.access_hash,
                entity.kind.as_str()
            ],
        )
        .map_err(|e| fail("save_entity", &format!("{} {}", entity.phone, entity.handle), e))?;
        Ok(())
    }

    // ---- statistics ----

    pub fn statistics(&self, phone: &str) -> Result<Option<StatisticsRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT earned, completed_tasks, skipped_tasks FROM statistics WHERE phone = ?1",
            [phone],
            |row| {
                Ok(StatisticsRecord {
                    phone: phone.to_string(),
                    earned: row.get(0)?,
                    completed_tasks: row.get(1)?,
                    skipped_tasks: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| fail("statistics", phone, e))
    }

    pub fn increment_earned(&self, phone: &str, amount: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO statistics (phone, earned) VALUES (?1, ?2)
             ON CONFLICT(phone) DO UPDATE SET earned = earned + excluded.earned",
            params![phone, amount],
        )
        .map_err(|e| fail("increment_earned", &format!("{phone} {amount}"), e))?;
        Ok(())
    }

    pub fn increment_completed(&self, phone: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO statistics (phone, completed_tasks) VALUES (?1, 1)
             ON CONFLICT(phone) DO UPDATE SET completed_tasks = completed_tasks + 1",
            [phone],
        )
        .map_err(|e| fail("increment_completed", phone, e))?;
        Ok(())
    }

    pub fn increment_skipped(&self, phone: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO statistics (phone, skipped_tasks) VALUES (?1, 1)
             ON CONFLICT(phone) DO UPDATE SET skipped_tasks = skipped_tasks + 1",
            [phone],
        )
        .map_err(|e| fail("increment_skipped", phone, e))?;
        Ok(())
    }

    // ---- rate counters ----

    /// Channel joins recorded in the current one-hour window. The first
    /// read after the window has elapsed resets the counter to zero and
    /// restarts the window; reset and read happen atomically.
    pub fn join_count(&self, phone: &str) -> Result<i64> {
        self.windowed_count(
            "joined_channels",
            "joined_count",
            "last_joined_at",
            JOIN_WINDOW_SECS,
            phone,
            Utc::now().timestamp(),
        )
    }

    pub fn record_join(&self, phone: &str) -> Result<()> {
        self.record_windowed(
            "joined_channels",
            "joined_count",
            "last_joined_at",
            phone,
            Utc::now().timestamp(),
        )
    }

    /// Entity resolutions recorded in the current 24-hour window.
    pub fn request_count(&self, phone: &str) -> Result<i64> {
        self.windowed_count(
            "entity_requests",
            "requests_count",
            "last_request_at",
            REQUEST_WINDOW_SECS,
            phone,
            Utc::now().timestamp(),
        )
    }

    pub fn record_request(&self, phone: &str) -> Result<()> {
        self.record_windowed(
            "entity_requests",
            "requests_count",
            "last_request_at",
            phone,
            Utc::now().timestamp(),
        )
    }

    fn windowed_count(
        &self,
        table: &str,
        count_col: &str,
        stamp_col: &str,
        window_secs: i64,
        phone: &str,
        now: i64,
    ) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| fail(table, phone, e))?;
        let row: Option<(i64, i64)> = tx
            .query_row(
                &format!("SELECT {count_col}, {stamp_col} FROM {table} WHERE phone = ?1"),
                [phone],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| fail(table, phone, e))?;
        let count = match row {
            None => 0,
            Some((_, stamp)) if now - stamp >= window_secs => {
                tx.execute(
                    &format!("UPDATE {table} SET {count_col} = 0, {stamp_col} = ?2 WHERE phone = ?1"),
                    params![phone, now],
                )
                .map_err(|e| fail(table, phone, e))?;
                0
            }
            Some((count, _)) => count,
        };
        tx.commit().map_err(|e| fail(table, phone, e))?;
        Ok(count)
    }

    fn record_windowed(
        &self,
        table: &str,
        count_col: &str,
        stamp_col: &str,
        phone: &str,
        now: i64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (phone, {count_col}, {stamp_col}) VALUES (?1, 1, ?2)
                 ON CONFLICT(phone) DO UPDATE SET
                    {count_col} = {count_col} + 1,
                    {stamp_col} = excluded.{stamp_col}"
            ),
            params![phone, now],
        )
        .map_err(|e| fail(table, phone, e))?;
        Ok(())
    }
}

/// Log a failed operation with its arguments, then hand the error back
/// up as [`MinerError::Store`].
fn fail(op: &str, args: &str, e: impl std::fmt::Display) -> MinerError {
    tracing::error!("store operation '{op}' failed (args: {args}): {e}");
    MinerError::Store(format!("{op}: {e}"))
}
