// Rangefeed Catch-Up
//
// Replays the committed history of a span after a start timestamp as
// change events, so a live feed can continue from where the backfill
// stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::mvcc::{pretty_key, Key, StoreError, Timestamp};

pub mod catchup;
pub mod config;
pub mod diff;
pub mod filter;
pub mod intent;

pub use catchup::CatchUpIterator;
pub use config::ScanConfig;

/// One change produced by a catch-up scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub key: Key,
    /// Empty for deletions.
    pub value: Vec<u8>,
    pub timestamp: Timestamp,
    /// Value of the nearest older revision. Only populated for diff scans.
    pub prev_value: Option<Vec<u8>>,
    /// Reserved; always zero.
    pub prev_timestamp: Timestamp,
}

impl ChangeEvent {
    pub fn is_delete(&self) -> bool {
        self.value.is_empty()
    }
}

/// Error returned by an event callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort a catch-up scan.
#[derive(Debug, thiserror::Error)]
pub enum CatchUpError {
    #[error(transparent)]
    StoreRead(#[from] StoreError),

    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    #[error(transparent)]
    Callback(CallbackError),

    #[error("resource error: {0}")]
    Resource(#[source] StoreError),

    #[error("invalid span: {0}")]
    InvalidSpan(String),

    #[error("invalid time window: end {end} is not after start {start}")]
    InvalidWindow { start: Timestamp, end: Timestamp },

    #[error("catch-up scan cancelled")]
    Cancelled,

    #[error("catch-up iterator is closed")]
    Closed,

    #[error("catch-up iterator has already been scanned")]
    AlreadyScanned,
}

impl CatchUpError {
    pub(crate) fn inline_value(key: &[u8]) -> Self {
        Self::UnsupportedLayout(format!("unexpected inline value at key {}", pretty_key(key)))
    }
}

/// How the forward scan treats intents inside the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentPolicy {
    /// Emit the provisional value at the intent's write timestamp.
    ///
    /// NOTE:
    /// Consumers must tolerate the intent later aborting.
    #[default]
    Emit,

    /// Leave intents to the live feed, emitting committed values only.
    ///
    /// This is committed-only catch-up: unresolved intents never produce
    /// events during the scan.
    Skip,
}

/// Optional settings for a catch-up iterator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpOptions {
    /// Inclusive upper bound; unbounded when absent.
    #[serde(default)]
    pub end_timestamp: Option<Timestamp>,

    #[serde(default)]
    pub intents: IntentPolicy,
}

/// Cooperative cancellation signal, polled between raw reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters describing one completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpStats {
    pub positions_read: u64,
    pub events_emitted: u64,
    pub skipped_below_window: u64,
    pub skipped_above_window: u64,
    pub omitted: u64,
    pub intents_skipped: u64,
}
