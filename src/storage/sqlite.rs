//! SQLite store
//!
//! Implements [`ChannelStore`] and [`ScheduleEventStore`] on a single SQLite
//! database. Each `add` batch runs in one transaction so a pass either lands
//! completely or not at all.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{AddOutcome, ChannelStore, ScheduleEventStore, StoreError, StoreResult};
use crate::models::{
    Channel, ChannelId, ChannelType, EventStatus, ScheduleEvent, TenantId, TimeRange,
};

/// SQLite-backed channel and schedule store
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::unavailable(format!(
                        "cannot create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::unavailable("connection lock poisoned"))
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS channels (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    channel_type TEXT NOT NULL DEFAULT 'linear',
                    horizon_secs INTEGER,
                    feeds TEXT NOT NULL DEFAULT '[]'
                );

                CREATE INDEX IF NOT EXISTS idx_channels_tenant
                    ON channels(tenant_id);

                CREATE TABLE IF NOT EXISTS schedule_events (
                    channel_id TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    start_ms INTEGER NOT NULL,
                    end_ms INTEGER NOT NULL,
                    item_guid TEXT NOT NULL,
                    title TEXT NOT NULL,
                    loop_pass INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'planned',
                    PRIMARY KEY (channel_id, sequence)
                );

                CREATE INDEX IF NOT EXISTS idx_schedule_events_window
                    ON schedule_events(channel_id, start_ms, end_ms);
                "#,
        )?;
        Ok(())
    }

    /// Insert or replace a channel definition
    ///
    /// This is the external write path; the scheduler never calls it.
    pub fn upsert_channel(&self, channel: &Channel) -> StoreResult<()> {
        let feeds = serde_json::to_string(&channel.feeds)
            .map_err(|e| StoreError::Corrupt(format!("feeds for '{}': {e}", channel.id)))?;
        let conn = self.conn()?;
        conn.execute(
            r#"
                INSERT INTO channels (id, tenant_id, name, channel_type, horizon_secs, feeds)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    name = excluded.name,
                    channel_type = excluded.channel_type,
                    horizon_secs = excluded.horizon_secs,
                    feeds = excluded.feeds
                "#,
            params![
                channel.id.as_str(),
                channel.tenant_id.as_str(),
                channel.name,
                channel.channel_type.as_str(),
                channel.horizon_secs,
                feeds
            ],
        )?;
        Ok(())
    }

    fn query_channels(&self, tenant: Option<&TenantId>) -> StoreResult<Vec<Channel>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, channel_type, horizon_secs, feeds
             FROM channels
             WHERE (?1 IS NULL OR tenant_id = ?1)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![tenant.map(TenantId::as_str)], |row| {
            Ok(RawChannelRow {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                name: row.get(2)?,
                channel_type: row.get(3)?,
                horizon_secs: row.get(4)?,
                feeds: row.get(5)?,
            })
        })?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?.into_channel()?);
        }
        Ok(channels)
    }
}

struct RawChannelRow {
    id: String,
    tenant_id: String,
    name: String,
    channel_type: String,
    horizon_secs: Option<i64>,
    feeds: String,
}

impl RawChannelRow {
    fn into_channel(self) -> StoreResult<Channel> {
        let feeds: Vec<String> = serde_json::from_str(&self.feeds)
            .map_err(|e| StoreError::Corrupt(format!("feeds for '{}': {e}", self.id)))?;
        Ok(Channel {
            channel_type: ChannelType::parse(&self.channel_type).unwrap_or_default(),
            id: ChannelId::new(self.id),
            tenant_id: TenantId::new(self.tenant_id),
            name: self.name,
            horizon_secs: self.horizon_secs,
            feeds,
        })
    }
}

const EVENT_COLUMNS: &str =
    "channel_id, sequence, start_ms, end_ms, item_guid, title, loop_pass, status";

fn millis_to_utc(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

struct RawEventRow {
    channel_id: String,
    sequence: i64,
    start_ms: i64,
    end_ms: i64,
    item_guid: String,
    title: String,
    loop_pass: i64,
    status: String,
}

impl RawEventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            channel_id: row.get(0)?,
            sequence: row.get(1)?,
            start_ms: row.get(2)?,
            end_ms: row.get(3)?,
            item_guid: row.get(4)?,
            title: row.get(5)?,
            loop_pass: row.get(6)?,
            status: row.get(7)?,
        })
    }

    fn into_event(self) -> StoreResult<ScheduleEvent> {
        Ok(ScheduleEvent {
            channel_id: ChannelId::new(self.channel_id),
            sequence: u64::try_from(self.sequence)
                .map_err(|_| StoreError::Corrupt(format!("negative sequence {}", self.sequence)))?,
            start: millis_to_utc(self.start_ms)?,
            end: millis_to_utc(self.end_ms)?,
            item_guid: self.item_guid,
            title: self.title,
            loop_pass: u32::try_from(self.loop_pass)
                .map_err(|_| StoreError::Corrupt(format!("bad loop pass {}", self.loop_pass)))?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
        })
    }
}

fn sequence_param(sequence: u64) -> StoreResult<i64> {
    i64::try_from(sequence)
        .map_err(|_| StoreError::Corrupt(format!("sequence {sequence} exceeds storage range")))
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn list_all(&self) -> StoreResult<Vec<Channel>> {
        self.query_channels(None)
    }

    async fn list_by_tenant(&self, tenant: &TenantId) -> StoreResult<Vec<Channel>> {
        self.query_channels(Some(tenant))
    }

    async fn get(&self, id: &ChannelId) -> StoreResult<Option<Channel>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, tenant_id, name, channel_type, horizon_secs, feeds
                 FROM channels WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(RawChannelRow {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        name: row.get(2)?,
                        channel_type: row.get(3)?,
                        horizon_secs: row.get(4)?,
                        feeds: row.get(5)?,
                    })
                },
            )
            .optional()?;
        row.map(RawChannelRow::into_channel).transpose()
    }
}

#[async_trait]
impl ScheduleEventStore for SqliteStore {
    async fn events_by_channel(
        &self,
        channel_id: &ChannelId,
        range: TimeRange,
        include_expired: bool,
    ) -> StoreResult<Vec<ScheduleEvent>> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events
             WHERE channel_id = ?1 AND start_ms < ?2 AND end_ms > ?3
               AND (?4 OR status = 'planned')
             ORDER BY sequence"
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(
            params![
                channel_id.as_str(),
                range.end.timestamp_millis(),
                range.start.timestamp_millis(),
                include_expired
            ],
            RawEventRow::from_row,
        )?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    async fn tail(&self, channel_id: &ChannelId) -> StoreResult<Option<ScheduleEvent>> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM schedule_events
             WHERE channel_id = ?1 ORDER BY sequence DESC LIMIT 1"
        );
        let row = conn
            .query_row(&query, params![channel_id.as_str()], RawEventRow::from_row)
            .optional()?;
        row.map(RawEventRow::into_event).transpose()
    }

    async fn add(&self, events: &[ScheduleEvent]) -> StoreResult<AddOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut outcome = AddOutcome::default();

        {
            let select = format!(
                "SELECT {EVENT_COLUMNS} FROM schedule_events
                 WHERE channel_id = ?1 AND sequence = ?2"
            );
            let mut existing_stmt = tx.prepare(&select)?;
            let mut insert_stmt = tx.prepare(
                "INSERT INTO schedule_events
                     (channel_id, sequence, start_ms, end_ms, item_guid, title, loop_pass, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for event in events {
                let sequence = sequence_param(event.sequence)?;
                let existing = existing_stmt
                    .query_row(
                        params![event.channel_id.as_str(), sequence],
                        RawEventRow::from_row,
                    )
                    .optional()?;

                match existing {
                    Some(row) => {
                        if row.into_event()?.same_placement(event) {
                            outcome.unchanged += 1;
                        } else {
                            // Dropping the transaction rolls the batch back
                            return Err(StoreError::Conflict {
                                channel_id: event.channel_id.clone(),
                                sequence: event.sequence,
                            });
                        }
                    }
                    None => {
                        insert_stmt.execute(params![
                            event.channel_id.as_str(),
                            sequence,
                            event.start.timestamp_millis(),
                            event.end.timestamp_millis(),
                            event.item_guid,
                            event.title,
                            i64::from(event.loop_pass),
                            event.status.as_str(),
                        ])?;
                        outcome.inserted += 1;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    async fn mark_expired(
        &self,
        channel_id: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE schedule_events SET status = ?1
             WHERE channel_id = ?2 AND status = ?3 AND end_ms < ?4",
            params![
                EventStatus::Expired.as_str(),
                channel_id.as_str(),
                EventStatus::Planned.as_str(),
                before.timestamp_millis()
            ],
        )?;
        Ok(updated)
    }
}
