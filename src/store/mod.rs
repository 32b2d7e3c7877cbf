//! Photo store boundary.
//!
//! Captured stills are persisted into an album of a shared, externally
//! mutable photo store: other agents may delete photos behind our back or
//! drop new ones into the album. The store therefore supports a
//! reserve/write/finalize protocol for producers (a half-written photo is
//! never visible to queries) and change notifications for observers.
//! [`LocalStore`] is the crate's filesystem-backed implementation.

pub mod local;
mod schema;

use std::fmt;

use tokio::sync::broadcast;

use crate::error::Result;

pub use local::LocalStore;

/// Stable reference to a finalized photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhotoRef(pub i64);

impl fmt::Display for PhotoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "photo:{}", self.0)
    }
}

/// Reference to a reserved entry whose bytes are not yet finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingRef(pub i64);

/// One finalized photo as returned by [`MediaStore::query`].
#[derive(Debug, Clone)]
pub struct PhotoRow {
    pub ref_: PhotoRef,
    pub display_name: String,
    /// When the entry was added to the store, milliseconds since epoch.
    pub date_added_ms: i64,
    /// When the photo was taken per its metadata, when known.
    pub date_taken_ms: Option<i64>,
}

impl PhotoRow {
    /// The timestamp shown for this photo: taken when recorded and
    /// positive, else added.
    pub fn effective_timestamp_ms(&self) -> i64 {
        match self.date_taken_ms {
            Some(taken) if taken > 0 => taken,
            _ => self.date_added_ms,
        }
    }
}

/// A change in store contents, delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Added(PhotoRef),
    Removed(PhotoRef),
    /// The index was reconciled against the filesystem and changed.
    Rescanned,
}

/// A tag-addressed media store capable of staged writes.
///
/// Operations are synchronous and may block on I/O; async callers run
/// them through `spawn_blocking`.
pub trait MediaStore: Send + Sync + 'static {
    /// Reserve a pending entry in `album`. The entry is invisible to
    /// [`query`](Self::query) until finalized.
    fn reserve(&self, display_name: &str, mime: &str, album: &str) -> Result<PendingRef>;

    /// Write the entry's bytes. May be called only between reserve and
    /// finalize/discard.
    fn write(&self, pending: &PendingRef, bytes: &[u8]) -> Result<()>;

    /// Publish a fully written entry.
    fn finalize(&self, pending: PendingRef) -> Result<PhotoRef>;

    /// Drop a reserved entry and any bytes written for it. Best-effort.
    fn discard(&self, pending: PendingRef);

    /// All finalized photos in `album`, newest added first (ties broken
    /// by insertion order, newest first).
    fn query(&self, album: &str) -> Result<Vec<PhotoRow>>;

    /// Delete one photo. A missing photo is an error; callers treat it as
    /// non-fatal and per-photo.
    fn delete(&self, photo: PhotoRef) -> Result<()>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(added: i64, taken: Option<i64>) -> PhotoRow {
        PhotoRow {
            ref_: PhotoRef(1),
            display_name: "IMG_20250101_120000.jpg".to_string(),
            date_added_ms: added,
            date_taken_ms: taken,
        }
    }

    #[test]
    fn effective_timestamp_prefers_taken() {
        assert_eq!(row(1_000, Some(2_000)).effective_timestamp_ms(), 2_000);
    }

    #[test]
    fn effective_timestamp_falls_back_to_added() {
        assert_eq!(row(1_000, None).effective_timestamp_ms(), 1_000);
        // A zero taken timestamp means "not recorded".
        assert_eq!(row(1_000, Some(0)).effective_timestamp_ms(), 1_000);
    }
}
