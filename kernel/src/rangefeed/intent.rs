// Intent Resolution
//
// Turns a raw intent marker into its owning transaction and the
// provisional value it carries. Shared by the forward scan and by
// diff lookups.

use crate::mvcc::{pretty_key, IntentMarker, StoreSnapshot, Timestamp, TxnMeta};

use super::CatchUpError;

/// An intent paired with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIntent {
    pub txn: TxnMeta,
    pub provisional_value: Vec<u8>,
}

impl ResolvedIntent {
    /// Whether the owner excludes its writes from feeds.
    pub fn omitted(&self) -> bool {
        self.txn.omit_in_rangefeeds
    }
}

pub struct IntentResolver<'a, S: ?Sized> {
    snapshot: &'a S,
}

impl<'a, S: StoreSnapshot + ?Sized> IntentResolver<'a, S> {
    pub fn new(snapshot: &'a S) -> Self {
        Self { snapshot }
    }

    /// Resolve the intent found on `key` at `position`.
    ///
    /// The owner record must name the marker's transaction and write at
    /// exactly `position`; anything else is a layout error.
    pub fn resolve(
        &self,
        key: &[u8],
        position: Timestamp,
        marker: &IntentMarker,
    ) -> Result<ResolvedIntent, CatchUpError> {
        let txn = self.snapshot.resolve_intent_owner(marker)?;

        if txn.id != marker.txn_id {
            return Err(CatchUpError::UnsupportedLayout(format!(
                "intent on {} names transaction {} but owner record is {}",
                pretty_key(key),
                marker.txn_id,
                txn.id
            )));
        }
        if txn.write_timestamp != position {
            return Err(CatchUpError::UnsupportedLayout(format!(
                "intent on {} at {} does not match owner write timestamp {}",
                pretty_key(key),
                position,
                txn.write_timestamp
            )));
        }

        Ok(ResolvedIntent {
            txn,
            provisional_value: marker.provisional_value.clone(),
        })
    }
}
