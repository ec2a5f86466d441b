// Multi-Version Data Model
//
// Keys, hybrid timestamps, spans and the raw positions a versioned
// store hands out during iteration. The store itself lives behind the
// traits in `store`; `memory` provides an in-process implementation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;
pub mod store;

pub use memory::{InMemoryStore, IntentResolution};
pub use store::{ScanBounds, StoreError, StoreSnapshot, VersionedStore};

/// Opaque, lexicographically ordered key.
pub type Key = Vec<u8>;

/// Smallest possible key.
pub const KEY_MIN: &[u8] = &[];

/// Upper bound that sorts after every user key.
pub const KEY_MAX: &[u8] = &[0xff, 0xff];

/// Render a key for logs and error messages.
pub fn pretty_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Hybrid logical clock timestamp.
///
/// The zero value marks unversioned (inline) data and never names a
/// real revision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "RawTimestamp")]
pub struct Timestamp {
    pub wall_time: i64,
    pub logical: i32,
}

/// Wire form of `Timestamp`, checked before use.
#[derive(Deserialize)]
struct RawTimestamp {
    wall_time: i64,
    #[serde(default)]
    logical: i32,
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = ParseTimestampError;

    fn try_from(raw: RawTimestamp) -> Result<Self, Self::Error> {
        if raw.wall_time < 0 || raw.logical < 0 {
            return Err(ParseTimestampError(format!(
                "{}.{}",
                raw.wall_time, raw.logical
            )));
        }
        Ok(Self::new(raw.wall_time, raw.logical))
    }
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    pub fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Shorthand for a timestamp with no logical component.
    pub fn wall(wall_time: i64) -> Self {
        Self::new(wall_time, 0)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::ZERO
    }

    /// Offset both components, saturating at the integer bounds.
    pub fn add(&self, wall_time: i64, logical: i32) -> Self {
        Self::new(
            self.wall_time.saturating_add(wall_time),
            self.logical.saturating_add(logical),
        )
    }

    /// The next larger timestamp.
    ///
    /// Saturates at the maximum timestamp.
    pub fn next(&self) -> Self {
        if self.logical == i32::MAX {
            if self.wall_time == i64::MAX {
                return *self;
            }
            Self::new(self.wall_time + 1, 0)
        } else {
            Self::new(self.wall_time, self.logical + 1)
        }
    }

    /// The largest timestamp strictly below this one.
    ///
    /// Saturates at zero.
    pub fn prev(&self) -> Self {
        if self.logical > 0 {
            Self::new(self.wall_time, self.logical - 1)
        } else if self.wall_time > 0 {
            Self::new(self.wall_time - 1, i32::MAX)
        } else {
            Self::ZERO
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:010}", self.wall_time, self.logical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp `{0}`: expected <wall>[.<logical>]")]
pub struct ParseTimestampError(pub String);

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimestampError(s.to_string());
        let (wall, logical) = match s.split_once('.') {
            Some((wall, logical)) => (wall, logical.parse::<i32>().map_err(|_| err())?),
            None => (s, 0),
        };
        let wall_time = wall.parse::<i64>().map_err(|_| err())?;
        if wall_time < 0 || logical < 0 {
            return Err(err());
        }
        Ok(Self::new(wall_time, logical))
    }
}

/// Half-open key range `[key, end_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub key: Key,
    pub end_key: Key,
}

impl Span {
    pub fn new(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: end_key.into(),
        }
    }

    /// Span covering every user key.
    pub fn full() -> Self {
        Self::new(KEY_MIN, KEY_MAX)
    }

    pub fn is_valid(&self) -> bool {
        self.key < self.end_key
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.key.as_slice() <= key && key < self.end_key.as_slice()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", pretty_key(&self.key), pretty_key(&self.end_key))
    }
}

/// Time window of a catch-up scan: `(start, end]`.
///
/// `end == None` leaves the window open above.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Option<Timestamp>) -> Self {
        Self { start, end }
    }

    pub fn is_below(&self, ts: Timestamp) -> bool {
        ts <= self.start
    }

    pub fn is_above(&self, ts: Timestamp) -> bool {
        matches!(self.end, Some(end) if ts > end)
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        !self.is_below(ts) && !self.is_above(ts)
    }
}

/// Committed value bytes plus the header flags persisted with them.
///
/// Empty bytes denote a deletion tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccValue {
    pub raw_bytes: Vec<u8>,
    #[serde(default)]
    pub omit_in_rangefeeds: bool,
}

impl MvccValue {
    pub fn new(raw_bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            raw_bytes: raw_bytes.into(),
            omit_in_rangefeeds: false,
        }
    }

    pub fn tombstone() -> Self {
        Self::default()
    }

    pub fn is_tombstone(&self) -> bool {
        self.raw_bytes.is_empty()
    }
}

/// Metadata of the transaction owning an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnMeta {
    pub id: Uuid,
    /// Anchor key of the transaction record.
    pub key: Key,
    pub epoch: u32,
    pub write_timestamp: Timestamp,
    /// Writes of this transaction must never reach change feeds.
    #[serde(default)]
    pub omit_in_rangefeeds: bool,
}

impl TxnMeta {
    pub fn new(key: impl Into<Key>, write_timestamp: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            epoch: 0,
            write_timestamp,
            omit_in_rangefeeds: false,
        }
    }

    pub fn with_omit_in_rangefeeds(mut self, omit: bool) -> Self {
        self.omit_in_rangefeeds = omit;
        self
    }
}

/// Raw uncommitted-write marker as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMarker {
    pub txn_id: Uuid,
    pub provisional_value: Vec<u8>,
}

/// What the store holds at one (key, timestamp) position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionKind {
    Value(MvccValue),
    Intent(IntentMarker),
    /// Unversioned data; only valid at the zero timestamp.
    Inline(Vec<u8>),
}

/// One raw position produced by a store cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVersion {
    pub key: Key,
    pub timestamp: Timestamp,
    pub kind: VersionKind,
}

/// Versioned key in store order.
///
/// Keys ascend. Within a key the zero timestamp sorts first and the
/// remaining timestamps descend, so the newest revision comes right
/// after any inline entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MvccKey {
    pub key: Key,
    pub timestamp: Timestamp,
}

impl MvccKey {
    pub fn new(key: impl Into<Key>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            timestamp,
        }
    }
}

impl Ord for MvccKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| {
            match (self.timestamp.is_empty(), other.timestamp.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => other.timestamp.cmp(&self.timestamp),
            }
        })
    }
}

impl PartialOrd for MvccKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
