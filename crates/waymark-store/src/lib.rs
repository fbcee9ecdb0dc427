//! Durable queue of accepted location fixes.
//!
//! Every fix the tracker decides to log lands here before anything else
//! observes it. Rows then move through a delivery lifecycle driven by the
//! sync engine:
//!
//! ```text
//! pending ──claim──▶ syncing ──▶ synced
//!    ▲                  │
//!    └──── retry ───────┤
//!                       └──▶ rejected
//! ```
//!
//! A row in `syncing` at open time belongs to an attempt that was
//! interrupted by a crash; [`Store::open`] returns it to `pending`.
//!
//! # Example
//!
//! ```
//! use waymark_store::Store;
//! use waymark_types::{EntrySource, LocationFix};
//! use time::OffsetDateTime;
//!
//! let store = Store::open_in_memory()?;
//! let fix = LocationFix::builder(51.5007, -0.1246).accuracy(8.0).build();
//!
//! let id = store.insert(&fix, EntrySource::Automatic, OffsetDateTime::now_utc())?;
//! let claimed = store.claim_next(OffsetDateTime::now_utc())?.unwrap();
//! assert_eq!(claimed.id, id);
//!
//! store.mark_synced(id)?;
//! # Ok::<(), waymark_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{QueueStats, QueuedLocation};
pub use queries::QueueQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/waymark/queue.db`
/// - macOS: `~/Library/Application Support/waymark/queue.db`
/// - Windows: `C:\Users\<user>\AppData\Local\waymark\queue.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("waymark")
        .join("queue.db")
}
