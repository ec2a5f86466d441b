// Versioned Store Abstraction
//
// Defines the read contract a catch-up scan consumes from the
// multi-version storage engine. Implementations may be a real
// engine, a remote replica, or the in-memory store used in tests.
//
// This module defines *interfaces only*.

use uuid::Uuid;

use super::{IntentMarker, RawVersion, Span, TimeWindow, Timestamp, TxnMeta};

/// Errors surfaced by a versioned store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("snapshot is closed")]
    SnapshotClosed,

    #[error("transaction record {0} not found")]
    TxnNotFound(Uuid),

    #[error("write rejected: {0}")]
    WriteRejected(String),
}

/// Bounds a snapshot cursor is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBounds {
    pub span: Span,
    pub window: TimeWindow,
}

/// Source of point-in-time snapshots.
pub trait VersionedStore {
    type Snapshot: StoreSnapshot;

    /// Capture a snapshot with one cursor positioned at the start of
    /// `bounds.span`.
    fn open_snapshot(&self, bounds: &ScanBounds) -> Result<Self::Snapshot, StoreError>;
}

/// A consistent, read-only view of the store owning one forward cursor.
///
/// Properties required from implementations:
/// - Positions come out in key-ascending order
/// - Within a key, an inline (zero timestamp) entry comes first and
///   revisions follow newest first
/// - Reads never observe writes made after the snapshot was opened
pub trait StoreSnapshot {
    /// Advance the cursor and return the next raw position, or `None`
    /// once the span is exhausted.
    ///
    /// A time-bounded cursor may elide committed values outside the
    /// window, but must surface every intent and inline entry.
    fn next_version(&mut self) -> Result<Option<RawVersion>, StoreError>;

    /// Seek to `(key, timestamp)` and return the position the seek lands
    /// on: the newest revision of `key` at or below `timestamp`, or the
    /// first position after it.
    ///
    /// With `ignore_lower_bound == false` the seek honours the snapshot's
    /// time window and skips positions outside it, so the result may
    /// belong to a later key. Callers must check the returned key.
    fn value_at_or_before(
        &self,
        key: &[u8],
        timestamp: Timestamp,
        ignore_lower_bound: bool,
    ) -> Result<Option<RawVersion>, StoreError>;

    /// Look up the transaction owning an intent.
    fn resolve_intent_owner(&self, marker: &IntentMarker) -> Result<TxnMeta, StoreError>;

    /// Release the snapshot. Further reads fail.
    fn close(&mut self) -> Result<(), StoreError>;
}
