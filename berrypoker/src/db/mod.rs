//! SQLite-backed durable store.
//!
//! Room snapshots, hand history, and player statistics live here. The pool
//! is capped at a single connection so every write goes through one writer,
//! which is all SQLite wants anyway.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::warn;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod history;

pub use config::DatabaseConfig;
pub use history::{HandRecord, PlayerStatsRow};

use crate::game::table::TableSnapshot;
use crate::game::{Table, TableError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt snapshot for room {room_id}: {source}")]
    CorruptSnapshot {
        room_id: String,
        #[source]
        source: Box<TableError>,
    },
}

/// Handle to the durable store. Cheap to clone via the inner pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database file and ensure the
    /// schema exists.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);
        Self::connect(options).await
    }

    /// An in-memory store for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .busy_timeout(Duration::from_secs(1));
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // One connection total: the single-writer discipline, and it keeps
        // an in-memory database alive for its whole lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                room_id    TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hands (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id      TEXT NOT NULL,
                hand_number  INTEGER NOT NULL,
                pot_size     INTEGER NOT NULL,
                winner_names TEXT NOT NULL,
                winning_hand TEXT,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_stats (
                name         TEXT PRIMARY KEY,
                hands_played INTEGER NOT NULL DEFAULT 0,
                hands_won    INTEGER NOT NULL DEFAULT 0,
                total_profit INTEGER NOT NULL DEFAULT 0,
                biggest_pot  INTEGER NOT NULL DEFAULT 0,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                hand_id     INTEGER NOT NULL REFERENCES hands(id),
                player_name TEXT NOT NULL,
                action      TEXT NOT NULL,
                amount      INTEGER NOT NULL,
                phase       TEXT NOT NULL,
                sequence    INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Room snapshots

    /// Write (or replace) the room's snapshot.
    pub async fn save_room(&self, table: &Table) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(&table.snapshot())?;
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO rooms (room_id, state_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(room_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&table.room_id)
        .bind(state_json)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_room(&self, room_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM rooms WHERE room_id = ?1")
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load all snapshots fresher than the given window. Snapshots that no
    /// longer parse are skipped with a warning rather than aborting
    /// recovery of the healthy rooms.
    pub async fn load_recent_rooms(&self, window: Duration) -> Result<Vec<Table>, StoreError> {
        let cutoff = cutoff(window);
        let rows = sqlx::query("SELECT room_id, state_json FROM rooms WHERE updated_at > ?1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let room_id: String = row.get("room_id");
            let state_json: String = row.get("state_json");
            match parse_snapshot(&room_id, &state_json) {
                Ok(table) => tables.push(table),
                Err(err) => warn!("skipping room {room_id} during recovery: {err}"),
            }
        }
        Ok(tables)
    }

    /// Delete snapshots older than the window. Returns the purged ids.
    pub async fn purge_stale_rooms(&self, window: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = cutoff(window);
        let rows = sqlx::query("SELECT room_id FROM rooms WHERE updated_at < ?1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        let ids: Vec<String> = rows.iter().map(|row| row.get("room_id")).collect();
        if !ids.is_empty() {
            sqlx::query("DELETE FROM rooms WHERE updated_at < ?1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        }
        Ok(ids)
    }
}

fn cutoff(window: Duration) -> DateTime<Utc> {
    let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(24));
    Utc::now() - window
}

fn parse_snapshot(room_id: &str, state_json: &str) -> Result<Table, StoreError> {
    let snapshot: TableSnapshot = serde_json::from_str(state_json)?;
    Table::from_snapshot(snapshot).map_err(|source| StoreError::CorruptSnapshot {
        room_id: room_id.to_string(),
        source: Box::new(source),
    })
}
