//! Query builder for queued locations.
//!
//! # Example
//!
//! ```
//! use waymark_store::{QueueQuery, Store};
//! use waymark_types::DeliveryState;
//!
//! let store = Store::open_in_memory()?;
//!
//! let pending = QueueQuery::new()
//!     .state(DeliveryState::Pending)
//!     .oldest_first()
//!     .limit(20);
//!
//! let rows = store.query(&pending)?;
//! assert!(rows.is_empty());
//! # Ok::<(), waymark_store::Error>(())
//! ```

use time::OffsetDateTime;

use waymark_types::{DeliveryState, EntrySource};

use crate::store::to_millis;

/// Column list shared by every row-returning statement.
pub(crate) const ROW_COLUMNS: &str = "id, latitude, longitude, accuracy, altitude, speed, \
     bearing, provider, captured_at, source, delivery_state, attempt_count, last_attempt_at, \
     next_attempt_at, last_error, rejection_reason, created_at";

/// Fluent query builder for [`Store::query`](crate::Store::query).
///
/// By default results are ordered by `captured_at` descending (newest first).
#[derive(Debug, Default, Clone)]
pub struct QueueQuery {
    /// Filter by delivery state.
    pub state: Option<DeliveryState>,
    /// Filter by entry source.
    pub source: Option<EntrySource>,
    /// Only rows captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Only rows captured at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by captured_at descending.
    pub newest_first: bool,
}

impl QueueQuery {
    /// Create a query matching every row, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by delivery state.
    pub fn state(mut self, state: DeliveryState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filter by entry source.
    pub fn source(mut self, source: EntrySource) -> Self {
        self.source = Some(source);
        self
    }

    /// Filter to rows captured at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to rows captured at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically (delivery order).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = self.state {
            conditions.push("delivery_state = ?");
            params.push(Box::new(state.as_str()));
        }

        if let Some(source) = self.source {
            conditions.push("source = ?");
            params.push(Box::new(source.as_str()));
        }

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {ROW_COLUMNS} FROM queued_locations {where_clause} \
             ORDER BY captured_at {order}, id {order}"
        );

        // SQLite requires LIMIT before OFFSET
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_has_no_filters() {
        let query = QueueQuery::new();
        let (where_clause, params) = query.build_where();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
        assert!(query.build_sql().ends_with("ORDER BY captured_at DESC, id DESC"));
    }

    #[test]
    fn test_state_and_source_filters() {
        let query = QueueQuery::new()
            .state(DeliveryState::Pending)
            .source(EntrySource::Manual);
        let (where_clause, params) = query.build_where();
        assert_eq!(where_clause, "WHERE delivery_state = ? AND source = ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_offset_without_limit() {
        let sql = QueueQuery::new().oldest_first().offset(10).build_sql();
        assert!(sql.contains("ORDER BY captured_at ASC, id ASC"));
        assert!(sql.ends_with("LIMIT -1 OFFSET 10"));
    }

    #[test]
    fn test_limit_and_offset() {
        let sql = QueueQuery::new().limit(50).offset(50).build_sql();
        assert!(sql.ends_with("LIMIT 50 OFFSET 50"));
    }
}
