//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use waymark_types::{DeliveryState, EntrySource, LocationFix};

use crate::error::{Error, Result};
use crate::models::{QueueStats, QueuedLocation};
use crate::queries::{QueueQuery, ROW_COLUMNS};
use crate::schema;

/// SQLite-backed durable queue of accepted fixes.
///
/// Every mutation after insert is a single state-conditioned statement, so
/// the tracker (inserting) and the sync engine (updating) never lose each
/// other's writes.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    ///
    /// Rows left in `syncing` by an interrupted process are returned to
    /// `pending` before the handle is returned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening queue database at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL keeps readers off the writer; FULL sync makes each row write atomic on disk
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&conn)?;

        let store = Self { conn };
        store.recover_interrupted()?;
        Ok(store)
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Cheap liveness probe for the underlying connection.
    pub fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Return every `syncing` row to `pending`.
    ///
    /// `syncing` only means "an attempt was in flight"; after a restart no
    /// attempt can be, so the row must become claimable again.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self.conn.execute(
            "UPDATE queued_locations SET delivery_state = 'pending'
             WHERE delivery_state = 'syncing'",
            [],
        )?;

        if recovered > 0 {
            warn!("Recovered {} interrupted delivery attempt(s)", recovered);
        }

        Ok(recovered)
    }
}

// Insert and lookup
impl Store {
    /// Insert an accepted fix as a new `pending` row.
    ///
    /// `created_at` is the logging decision time.
    pub fn insert(
        &self,
        fix: &LocationFix,
        source: EntrySource,
        created_at: OffsetDateTime,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO queued_locations
                (latitude, longitude, accuracy, altitude, speed, bearing, provider,
                 captured_at, source, delivery_state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10)",
            rusqlite::params![
                fix.latitude,
                fix.longitude,
                fix.accuracy,
                fix.altitude,
                fix.speed,
                fix.bearing,
                &fix.provider,
                to_millis(fix.timestamp),
                source.as_str(),
                to_millis(created_at),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(
            "Queued {} fix {} ({:.6}, {:.6}) ±{:.1} m",
            source.as_str(),
            id,
            fix.latitude,
            fix.longitude,
            fix.accuracy
        );

        Ok(id)
    }

    /// Get a row by ID.
    pub fn get(&self, id: i64) -> Result<Option<QueuedLocation>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ROW_COLUMNS} FROM queued_locations WHERE id = ?"),
                [id],
                map_row,
            )
            .optional()?;

        Ok(row)
    }

    /// Query rows with filters.
    pub fn query(&self, query: &QueueQuery) -> Result<Vec<QueuedLocation>> {
        let (_, params) = query.build_where();
        let sql = query.build_sql();

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(params_refs.as_slice(), map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count rows, optionally restricted to one delivery state.
    pub fn count(&self, state: Option<DeliveryState>) -> Result<u64> {
        let count: i64 = match state {
            Some(state) => self.conn.query_row(
                "SELECT COUNT(*) FROM queued_locations WHERE delivery_state = ?",
                [state.as_str()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM queued_locations", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// The most recently captured `synced` row of the given source.
    pub fn last_synced(&self, source: EntrySource) -> Result<Option<QueuedLocation>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ROW_COLUMNS} FROM queued_locations
                     WHERE delivery_state = 'synced' AND source = ?
                     ORDER BY captured_at DESC, id DESC LIMIT 1"
                ),
                [source.as_str()],
                map_row,
            )
            .optional()?;

        Ok(row)
    }

    /// The most recently captured row of the given source that is, or will
    /// become, `synced`. Rejected rows are skipped.
    pub fn last_deliverable(&self, source: EntrySource) -> Result<Option<QueuedLocation>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ROW_COLUMNS} FROM queued_locations
                     WHERE delivery_state != 'rejected' AND source = ?
                     ORDER BY captured_at DESC, id DESC LIMIT 1"
                ),
                [source.as_str()],
                map_row,
            )
            .optional()?;

        Ok(row)
    }

    /// Aggregate counts for status displays.
    pub fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();

        let mut stmt = self.conn.prepare(
            "SELECT delivery_state, COUNT(*) FROM queued_locations GROUP BY delivery_state",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (state, count) in counts {
            let count = count as u64;
            match state.parse::<DeliveryState>() {
                Ok(DeliveryState::Pending) => stats.pending = count,
                Ok(DeliveryState::Syncing) => stats.syncing = count,
                Ok(DeliveryState::Synced) => stats.synced = count,
                Ok(DeliveryState::Rejected) => stats.rejected = count,
                Err(e) => warn!("Ignoring unknown delivery state in stats: {}", e),
            }
        }

        let oldest: Option<i64> = self.conn.query_row(
            "SELECT MIN(captured_at) FROM queued_locations WHERE delivery_state = 'pending'",
            [],
            |row| row.get(0),
        )?;
        stats.oldest_pending_at = oldest.map(from_millis).transpose()?;

        stats.last_error = self
            .conn
            .query_row(
                "SELECT last_error FROM queued_locations
                 WHERE last_error IS NOT NULL
                 ORDER BY last_attempt_at DESC, id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(stats)
    }
}

// Delivery lifecycle
impl Store {
    /// Atomically claim the oldest eligible `pending` row, moving it to `syncing`.
    ///
    /// A row is eligible once its `next_attempt_at` (if any) is not after
    /// `now`. The select and the state change are one statement, so two
    /// concurrent callers can never claim the same row.
    pub fn claim_next(&self, now: OffsetDateTime) -> Result<Option<QueuedLocation>> {
        let now_ms = to_millis(now);

        let row = self
            .conn
            .query_row(
                &format!(
                    "UPDATE queued_locations SET
                        delivery_state = 'syncing',
                        attempt_count = attempt_count + 1,
                        last_attempt_at = ?1
                     WHERE id = (
                        SELECT id FROM queued_locations
                        WHERE delivery_state = 'pending'
                          AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                        ORDER BY captured_at ASC, id ASC
                        LIMIT 1
                     ) AND delivery_state = 'pending'
                     RETURNING {ROW_COLUMNS}"
                ),
                [now_ms],
                map_row,
            )
            .optional()?;

        if let Some(ref claimed) = row {
            debug!(
                "Claimed queued location {} (attempt {})",
                claimed.id, claimed.attempt_count
            );
        }

        Ok(row)
    }

    /// `syncing -> synced`.
    pub fn mark_synced(&self, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE queued_locations SET
                delivery_state = 'synced',
                next_attempt_at = NULL
             WHERE id = ?1 AND delivery_state = 'syncing'",
            [id],
        )?;

        self.check_transition(id, changed, DeliveryState::Synced)
    }

    /// `syncing -> pending` after a technical failure.
    ///
    /// The row becomes claimable again at `next_attempt_at`.
    pub fn mark_retry(&self, id: i64, error: &str, next_attempt_at: OffsetDateTime) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE queued_locations SET
                delivery_state = 'pending',
                last_error = ?2,
                next_attempt_at = ?3
             WHERE id = ?1 AND delivery_state = 'syncing'",
            rusqlite::params![id, error, to_millis(next_attempt_at)],
        )?;

        self.check_transition(id, changed, DeliveryState::Pending)
    }

    /// `syncing -> rejected`. Terminal.
    pub fn mark_rejected(&self, id: i64, reason: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE queued_locations SET
                delivery_state = 'rejected',
                rejection_reason = ?2,
                next_attempt_at = NULL
             WHERE id = ?1 AND delivery_state = 'syncing'",
            rusqlite::params![id, reason],
        )?;

        self.check_transition(id, changed, DeliveryState::Rejected)
    }

    /// Number of `pending` rows [`claim_next`](Self::claim_next) would consider at `now`.
    pub fn pending_due(&self, now: OffsetDateTime) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM queued_locations
             WHERE delivery_state = 'pending'
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)",
            [to_millis(now)],
            |row| row.get(0),
        )?;

        Ok(count as u64)
    }

    /// Earliest `next_attempt_at` among pending rows that are still backing off.
    pub fn next_retry_due(&self, now: OffsetDateTime) -> Result<Option<OffsetDateTime>> {
        let due: Option<i64> = self.conn.query_row(
            "SELECT MIN(next_attempt_at) FROM queued_locations
             WHERE delivery_state = 'pending' AND next_attempt_at > ?1",
            [to_millis(now)],
            |row| row.get(0),
        )?;

        due.map(from_millis).transpose()
    }

    fn check_transition(&self, id: i64, changed: usize, to: DeliveryState) -> Result<()> {
        if changed == 1 {
            return Ok(());
        }

        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT delivery_state FROM queued_locations WHERE id = ?",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            None => Err(Error::RowNotFound(id)),
            Some(state) => {
                let from = state.parse().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                })?;
                Err(Error::InvalidTransition { id, from, to })
            }
        }
    }
}

// Retention
impl Store {
    /// Delete rows created before `cutoff`, whatever their delivery state,
    /// except rows with an attempt in flight.
    pub fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let purged = self.conn.execute(
            "DELETE FROM queued_locations
             WHERE created_at < ?1 AND delivery_state != 'syncing'",
            [to_millis(cutoff)],
        )?;

        if purged > 0 {
            info!("Purged {} queued location(s) past retention", purged);
        }

        Ok(purged)
    }

    /// Evict rows until at most `cap` remain.
    ///
    /// Delivered and rejected rows go first (oldest first), then pending rows
    /// oldest-captured first. `syncing` rows are never evicted, so the table
    /// may stay above `cap` while attempts are in flight.
    pub fn enforce_row_cap(&self, cap: u64) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;

        let total: i64 = tx.query_row("SELECT COUNT(*) FROM queued_locations", [], |row| {
            row.get(0)
        })?;
        let mut excess = total - cap as i64;
        if excess <= 0 {
            return Ok(0);
        }

        let finished = tx.execute(
            "DELETE FROM queued_locations WHERE id IN (
                SELECT id FROM queued_locations
                WHERE delivery_state IN ('synced', 'rejected')
                ORDER BY created_at ASC, id ASC
                LIMIT ?1
             )",
            [excess],
        )?;
        excess -= finished as i64;

        let mut pending = 0;
        if excess > 0 {
            pending = tx.execute(
                "DELETE FROM queued_locations WHERE id IN (
                    SELECT id FROM queued_locations
                    WHERE delivery_state = 'pending'
                    ORDER BY captured_at ASC, id ASC
                    LIMIT ?1
                 )",
                [excess],
            )?;
        }

        tx.commit()?;

        if pending > 0 {
            warn!(
                "Queue over capacity ({}): evicted {} finished and {} undelivered row(s)",
                cap, finished, pending
            );
        } else {
            debug!("Queue over capacity ({}): evicted {} finished row(s)", cap, finished);
        }

        Ok(finished + pending)
    }
}

pub(crate) fn to_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(ms: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|_| Error::InvalidTimestamp(ms))
}

fn column_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let ms: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn column_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => column_time(row, idx).map(Some),
        None => Ok(None),
    }
}

fn column_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = waymark_types::ParseError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<QueuedLocation> {
    Ok(QueuedLocation {
        id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        accuracy: row.get(3)?,
        altitude: row.get(4)?,
        speed: row.get(5)?,
        bearing: row.get(6)?,
        provider: row.get(7)?,
        captured_at: column_time(row, 8)?,
        source: column_parsed(row, 9)?,
        delivery_state: column_parsed(row, 10)?,
        attempt_count: row.get::<_, i64>(11)? as u32,
        last_attempt_at: column_opt_time(row, 12)?,
        next_attempt_at: column_opt_time(row, 13)?,
        last_error: row.get(14)?,
        rejection_reason: row.get(15)?,
        created_at: column_time(row, 16)?,
    })
}
