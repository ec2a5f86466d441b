// In-Memory Versioned Store
//
// Ordered map of versioned keys plus a table of transaction records.
// Snapshots copy the requested span, so they stay consistent while the
// store keeps accepting writes.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;
use uuid::Uuid;

use super::store::{ScanBounds, StoreError, StoreSnapshot, VersionedStore};
use super::{
    pretty_key, IntentMarker, Key, MvccKey, MvccValue, RawVersion, TimeWindow, Timestamp,
    TxnMeta, VersionKind,
};

/// Outcome applied to an intent by `resolve_intent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentResolution {
    Commit,
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    versions: BTreeMap<MvccKey, VersionKind>,
    txns: HashMap<Uuid, TxnMeta>,
    closed: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a committed value at `timestamp`.
    pub fn put(
        &mut self,
        key: impl Into<Key>,
        timestamp: Timestamp,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), StoreError> {
        self.put_value(key, timestamp, MvccValue::new(value))
    }

    /// Write a deletion tombstone at `timestamp`.
    pub fn delete(&mut self, key: impl Into<Key>, timestamp: Timestamp) -> Result<(), StoreError> {
        self.put_value(key, timestamp, MvccValue::tombstone())
    }

    /// Write a committed value with explicit header flags.
    pub fn put_value(
        &mut self,
        key: impl Into<Key>,
        timestamp: Timestamp,
        value: MvccValue,
    ) -> Result<(), StoreError> {
        let key = key.into();
        if timestamp.is_empty() {
            return Err(StoreError::WriteRejected(format!(
                "versioned write to {} requires a non-zero timestamp",
                pretty_key(&key)
            )));
        }
        if let Some((_, marker)) = self.intent_on(&key) {
            return Err(StoreError::WriteRejected(format!(
                "conflicting intent on {} owned by {}",
                pretty_key(&key),
                marker.txn_id
            )));
        }
        self.versions
            .insert(MvccKey::new(key, timestamp), VersionKind::Value(value));
        Ok(())
    }

    /// Write an unversioned value at the zero timestamp.
    pub fn put_inline(&mut self, key: impl Into<Key>, value: impl Into<Vec<u8>>) {
        self.versions.insert(
            MvccKey::new(key, Timestamp::ZERO),
            VersionKind::Inline(value.into()),
        );
    }

    /// Write a provisional value owned by `txn` at its write timestamp.
    ///
    /// A transaction may rewrite its own intent; any other existing
    /// intent on the key, or a committed revision at or above the write
    /// timestamp, rejects the write.
    pub fn put_intent(
        &mut self,
        key: impl Into<Key>,
        txn: &TxnMeta,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        if txn.write_timestamp.is_empty() {
            return Err(StoreError::WriteRejected(format!(
                "intent on {} requires a non-zero write timestamp",
                pretty_key(&key)
            )));
        }
        if let Some(record) = self.txns.get(&txn.id) {
            if record.write_timestamp != txn.write_timestamp {
                return Err(StoreError::WriteRejected(format!(
                    "transaction {} already writes at {}",
                    txn.id, record.write_timestamp
                )));
            }
        }

        let existing = self
            .intent_on(&key)
            .map(|(mvcc_key, marker)| (mvcc_key.clone(), marker.txn_id));
        if let Some((_, owner)) = &existing {
            if *owner != txn.id {
                return Err(StoreError::WriteRejected(format!(
                    "conflicting intent on {} owned by {}",
                    pretty_key(&key),
                    owner
                )));
            }
        }
        if let Some(newest) = self.newest_committed(&key) {
            if newest >= txn.write_timestamp {
                return Err(StoreError::WriteRejected(format!(
                    "intent on {} at {} is not above committed revision {}",
                    pretty_key(&key),
                    txn.write_timestamp,
                    newest
                )));
            }
        }
        if let Some((mvcc_key, _)) = existing {
            self.versions.remove(&mvcc_key);
        }

        self.txns.insert(txn.id, txn.clone());
        self.versions.insert(
            MvccKey::new(key, txn.write_timestamp),
            VersionKind::Intent(IntentMarker {
                txn_id: txn.id,
                provisional_value: value.into(),
            }),
        );
        Ok(())
    }

    /// Commit or abort the intent `txn_id` holds on `key`.
    ///
    /// Returns `false` when there is no such intent. A committed intent
    /// keeps its timestamp and inherits the transaction's
    /// omit-from-feeds flag.
    pub fn resolve_intent(
        &mut self,
        key: &[u8],
        txn_id: Uuid,
        resolution: IntentResolution,
    ) -> Result<bool, StoreError> {
        let Some((mvcc_key, marker)) = self
            .intent_on(key)
            .map(|(mvcc_key, marker)| (mvcc_key.clone(), marker.clone()))
        else {
            return Ok(false);
        };
        if marker.txn_id != txn_id {
            return Ok(false);
        }
        let txn = self
            .txns
            .get(&txn_id)
            .ok_or(StoreError::TxnNotFound(txn_id))?;
        let omit_in_rangefeeds = txn.omit_in_rangefeeds;

        self.versions.remove(&mvcc_key);
        if resolution == IntentResolution::Commit {
            self.versions.insert(
                mvcc_key.clone(),
                VersionKind::Value(MvccValue {
                    raw_bytes: marker.provisional_value,
                    omit_in_rangefeeds,
                }),
            );
        }
        debug!(
            key = %pretty_key(key),
            timestamp = %mvcc_key.timestamp,
            txn = %txn_id,
            ?resolution,
            "resolved intent"
        );
        Ok(true)
    }

    /// Refuse any further snapshots.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn newest_committed(&self, key: &[u8]) -> Option<Timestamp> {
        self.versions
            .range(MvccKey::new(key, Timestamp::ZERO)..)
            .take_while(|(mvcc_key, _)| mvcc_key.key == key)
            .find_map(|(mvcc_key, kind)| match kind {
                VersionKind::Value(_) => Some(mvcc_key.timestamp),
                _ => None,
            })
    }

    fn intent_on(&self, key: &[u8]) -> Option<(&MvccKey, &IntentMarker)> {
        self.versions
            .range(MvccKey::new(key, Timestamp::ZERO)..)
            .take_while(|(mvcc_key, _)| mvcc_key.key == key)
            .find_map(|(mvcc_key, kind)| match kind {
                VersionKind::Intent(marker) => Some((mvcc_key, marker)),
                _ => None,
            })
    }
}

impl VersionedStore for InMemoryStore {
    type Snapshot = MemorySnapshot;

    fn open_snapshot(&self, bounds: &ScanBounds) -> Result<MemorySnapshot, StoreError> {
        if self.closed {
            return Err(StoreError::Unavailable("store is closed".into()));
        }
        if !bounds.span.is_valid() {
            return Err(StoreError::Read(format!("invalid span {}", bounds.span)));
        }

        let lower = MvccKey::new(bounds.span.key.clone(), Timestamp::ZERO);
        let upper = MvccKey::new(bounds.span.end_key.clone(), Timestamp::ZERO);
        let entries = self
            .versions
            .range(lower..upper)
            .map(|(mvcc_key, kind)| (mvcc_key.clone(), kind.clone()))
            .collect();

        Ok(MemorySnapshot {
            entries,
            txns: self.txns.clone(),
            window: bounds.window,
            cursor: 0,
            closed: false,
        })
    }
}

/// Point-in-time copy of one span of an `InMemoryStore`.
///
/// The cursor is time-bounded: committed values outside the window are
/// elided, intents and inline entries are always surfaced.
#[derive(Debug)]
pub struct MemorySnapshot {
    entries: Vec<(MvccKey, VersionKind)>,
    txns: HashMap<Uuid, TxnMeta>,
    window: TimeWindow,
    cursor: usize,
    closed: bool,
}

impl MemorySnapshot {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::SnapshotClosed)
        } else {
            Ok(())
        }
    }
}

fn to_raw(mvcc_key: &MvccKey, kind: &VersionKind) -> RawVersion {
    RawVersion {
        key: mvcc_key.key.clone(),
        timestamp: mvcc_key.timestamp,
        kind: kind.clone(),
    }
}

impl StoreSnapshot for MemorySnapshot {
    fn next_version(&mut self) -> Result<Option<RawVersion>, StoreError> {
        self.ensure_open()?;
        while let Some((mvcc_key, kind)) = self.entries.get(self.cursor) {
            self.cursor += 1;
            let elided =
                matches!(kind, VersionKind::Value(_)) && !self.window.contains(mvcc_key.timestamp);
            if !elided {
                return Ok(Some(to_raw(mvcc_key, kind)));
            }
        }
        Ok(None)
    }

    fn value_at_or_before(
        &self,
        key: &[u8],
        timestamp: Timestamp,
        ignore_lower_bound: bool,
    ) -> Result<Option<RawVersion>, StoreError> {
        self.ensure_open()?;
        let target = MvccKey::new(key, timestamp);
        let start = self.entries.partition_point(|(mvcc_key, _)| *mvcc_key < target);
        let found = self.entries[start..].iter().find(|(mvcc_key, _)| {
            ignore_lower_bound || self.window.contains(mvcc_key.timestamp)
        });
        Ok(found.map(|(mvcc_key, kind)| to_raw(mvcc_key, kind)))
    }

    fn resolve_intent_owner(&self, marker: &IntentMarker) -> Result<TxnMeta, StoreError> {
        self.ensure_open()?;
        self.txns
            .get(&marker.txn_id)
            .cloned()
            .ok_or(StoreError::TxnNotFound(marker.txn_id))
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        self.entries.clear();
        self.txns.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::Span;

    fn bounds(start: i64) -> ScanBounds {
        ScanBounds {
            span: Span::full(),
            window: TimeWindow::new(Timestamp::wall(start), None),
        }
    }

    fn drain(snapshot: &mut MemorySnapshot) -> Vec<(Key, Timestamp)> {
        let mut out = Vec::new();
        while let Some(raw) = snapshot.next_version().unwrap() {
            out.push((raw.key, raw.timestamp));
        }
        out
    }

    #[test]
    fn cursor_elides_old_values_but_surfaces_intents() {
        let mut store = InMemoryStore::new();
        store.put("a", Timestamp::wall(1), "a1").unwrap();
        store.put("a", Timestamp::wall(5), "a5").unwrap();
        let txn = TxnMeta::new("b", Timestamp::wall(2));
        store.put_intent("b", &txn, "b2").unwrap();

        let mut snapshot = store.open_snapshot(&bounds(3)).unwrap();
        assert_eq!(
            drain(&mut snapshot),
            vec![
                (b"a".to_vec(), Timestamp::wall(5)),
                (b"b".to_vec(), Timestamp::wall(2)),
            ]
        );
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut store = InMemoryStore::new();
        store.put("a", Timestamp::wall(1), "a1").unwrap();
        let mut snapshot = store.open_snapshot(&bounds(0)).unwrap();
        store.put("a", Timestamp::wall(2), "a2").unwrap();

        assert_eq!(drain(&mut snapshot).len(), 1);
    }

    #[test]
    fn committing_intent_inherits_omit_flag() {
        let mut store = InMemoryStore::new();
        let txn = TxnMeta::new("k", Timestamp::wall(4)).with_omit_in_rangefeeds(true);
        store.put_intent("k", &txn, "v").unwrap();
        assert!(store
            .resolve_intent(b"k", txn.id, IntentResolution::Commit)
            .unwrap());

        let snapshot = store.open_snapshot(&bounds(0)).unwrap();
        let raw = snapshot
            .value_at_or_before(b"k", Timestamp::wall(4), true)
            .unwrap()
            .unwrap();
        assert_eq!(
            raw.kind,
            VersionKind::Value(MvccValue {
                raw_bytes: b"v".to_vec(),
                omit_in_rangefeeds: true,
            })
        );
    }

    #[test]
    fn aborting_intent_removes_it() {
        let mut store = InMemoryStore::new();
        let txn = TxnMeta::new("k", Timestamp::wall(4));
        store.put_intent("k", &txn, "v").unwrap();
        assert!(store
            .resolve_intent(b"k", txn.id, IntentResolution::Abort)
            .unwrap());
        assert!(store.is_empty());
        assert!(!store
            .resolve_intent(b"k", txn.id, IntentResolution::Abort)
            .unwrap());
    }

    #[test]
    fn conflicting_writes_are_rejected() {
        let mut store = InMemoryStore::new();
        let txn = TxnMeta::new("k", Timestamp::wall(4));
        store.put_intent("k", &txn, "v").unwrap();

        let other = TxnMeta::new("k", Timestamp::wall(5));
        assert!(matches!(
            store.put_intent("k", &other, "w"),
            Err(StoreError::WriteRejected(_))
        ));
        assert!(matches!(
            store.put("k", Timestamp::wall(6), "x"),
            Err(StoreError::WriteRejected(_))
        ));
        assert!(matches!(
            store.put("z", Timestamp::ZERO, "x"),
            Err(StoreError::WriteRejected(_))
        ));
    }

    #[test]
    fn intent_cannot_shadow_committed_history() {
        let mut store = InMemoryStore::new();
        store.put("k", Timestamp::wall(5), "committed").unwrap();

        let same_ts = TxnMeta::new("k", Timestamp::wall(5));
        assert!(matches!(
            store.put_intent("k", &same_ts, "provisional"),
            Err(StoreError::WriteRejected(_))
        ));
        let below = TxnMeta::new("k", Timestamp::wall(3));
        assert!(matches!(
            store.put_intent("k", &below, "provisional"),
            Err(StoreError::WriteRejected(_))
        ));
        assert!(!store
            .resolve_intent(b"k", same_ts.id, IntentResolution::Abort)
            .unwrap());
        assert_eq!(store.len(), 1);

        let snapshot = store.open_snapshot(&bounds(0)).unwrap();
        let raw = snapshot
            .value_at_or_before(b"k", Timestamp::wall(5), true)
            .unwrap()
            .unwrap();
        assert_eq!(raw.kind, VersionKind::Value(MvccValue::new("committed")));

        let above = TxnMeta::new("k", Timestamp::wall(6));
        store.put_intent("k", &above, "provisional").unwrap();
        store.put_intent("k", &above, "rewritten").unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn bounded_lookup_can_land_on_unrelated_key() {
        let mut store = InMemoryStore::new();
        store.put("b", Timestamp::wall(1100), "foo").unwrap();
        let txn = TxnMeta::new("d", Timestamp::wall(990));
        store.put_intent("d", &txn, "intent").unwrap();
        store.put("e", Timestamp::wall(1100), "bar").unwrap();

        let snapshot = store.open_snapshot(&bounds(1000)).unwrap();

        let bounded = snapshot
            .value_at_or_before(b"d", Timestamp::wall(990), false)
            .unwrap()
            .unwrap();
        assert_eq!(bounded.key, b"e".to_vec());

        let unbounded = snapshot
            .value_at_or_before(b"d", Timestamp::wall(990), true)
            .unwrap()
            .unwrap();
        assert_eq!(unbounded.key, b"d".to_vec());
        assert!(matches!(unbounded.kind, VersionKind::Intent(_)));
    }

    #[test]
    fn closed_store_and_snapshot_refuse_reads() {
        let mut store = InMemoryStore::new();
        store.put("a", Timestamp::wall(1), "a1").unwrap();

        let mut snapshot = store.open_snapshot(&bounds(0)).unwrap();
        snapshot.close().unwrap();
        assert_eq!(snapshot.next_version(), Err(StoreError::SnapshotClosed));

        store.close();
        assert!(matches!(
            store.open_snapshot(&bounds(0)),
            Err(StoreError::Unavailable(_))
        ));
    }
}
