// Store Dump Adapter
//
// Parses a JSON dump of versioned data and transaction records and
// loads it into an in-memory store, so scans can be replayed offline.

use serde::Deserialize;
use uuid::Uuid;

use crate::mvcc::{InMemoryStore, MvccValue, StoreError, Timestamp, TxnMeta};

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("malformed store dump: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("intent on `{key}` references unknown transaction {txn}")]
    UnknownTransaction { key: String, txn: Uuid },

    #[error("store rejected dump entry: {0}")]
    Store(#[from] StoreError),
}

/// Top-level dump document.
///
/// Keys and values are UTF-8 strings.
#[derive(Debug, Default, Deserialize)]
pub struct StoreDump {
    #[serde(default)]
    pub versions: Vec<DumpVersion>,

    #[serde(default)]
    pub inline: Vec<DumpInline>,

    #[serde(default)]
    pub transactions: Vec<DumpTransaction>,

    #[serde(default)]
    pub intents: Vec<DumpIntent>,
}

/// A committed revision. A `null` value is a deletion.
#[derive(Debug, Deserialize)]
pub struct DumpVersion {
    pub key: String,
    pub timestamp: Timestamp,
    pub value: Option<String>,
    #[serde(default)]
    pub omit_in_rangefeeds: bool,
}

#[derive(Debug, Deserialize)]
pub struct DumpInline {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct DumpTransaction {
    pub id: Uuid,
    pub key: String,
    #[serde(default)]
    pub epoch: u32,
    pub write_timestamp: Timestamp,
    #[serde(default)]
    pub omit_in_rangefeeds: bool,
}

/// An open intent, written at its transaction's write timestamp.
#[derive(Debug, Deserialize)]
pub struct DumpIntent {
    pub key: String,
    pub txn: Uuid,
    pub value: String,
}

impl StoreDump {
    pub fn from_json(data: &str) -> Result<Self, DumpError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Load every entry into a fresh store.
    pub fn into_store(self) -> Result<InMemoryStore, DumpError> {
        let mut store = InMemoryStore::new();

        for version in self.versions {
            let value = MvccValue {
                raw_bytes: version.value.map(String::into_bytes).unwrap_or_default(),
                omit_in_rangefeeds: version.omit_in_rangefeeds,
            };
            store.put_value(version.key, version.timestamp, value)?;
        }

        for inline in self.inline {
            store.put_inline(inline.key, inline.value);
        }

        for intent in self.intents {
            let Some(txn) = self.transactions.iter().find(|t| t.id == intent.txn) else {
                return Err(DumpError::UnknownTransaction {
                    key: intent.key,
                    txn: intent.txn,
                });
            };
            let meta = TxnMeta {
                id: txn.id,
                key: txn.key.as_bytes().to_vec(),
                epoch: txn.epoch,
                write_timestamp: txn.write_timestamp,
                omit_in_rangefeeds: txn.omit_in_rangefeeds,
            };
            store.put_intent(intent.key, &meta, intent.value)?;
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::{ScanBounds, Span, StoreSnapshot, TimeWindow, VersionKind, VersionedStore};

    #[test]
    fn parse_and_load_store_dump() {
        let json = r#"
        {
          "versions": [
            { "key": "a", "timestamp": { "wall_time": 1 }, "value": "a1" },
            { "key": "a", "timestamp": { "wall_time": 2 }, "value": null },
            { "key": "b", "timestamp": { "wall_time": 3 }, "value": "b3", "omit_in_rangefeeds": true }
          ],
          "transactions": [
            {
              "id": "9f7c8b31-3f9d-4b0a-9c3c-6b8df92f7e11",
              "key": "c",
              "write_timestamp": { "wall_time": 4 }
            }
          ],
          "intents": [
            { "key": "c", "txn": "9f7c8b31-3f9d-4b0a-9c3c-6b8df92f7e11", "value": "c4" }
          ]
        }
        "#;

        let store = StoreDump::from_json(json).unwrap().into_store().unwrap();
        assert_eq!(store.len(), 4);

        let snapshot = store
            .open_snapshot(&ScanBounds {
                span: Span::full(),
                window: TimeWindow::default(),
            })
            .unwrap();
        let deleted = snapshot
            .value_at_or_before(b"a", Timestamp::wall(2), true)
            .unwrap()
            .unwrap();
        assert_eq!(deleted.kind, VersionKind::Value(MvccValue::tombstone()));

        let intent = snapshot
            .value_at_or_before(b"c", Timestamp::wall(4), true)
            .unwrap()
            .unwrap();
        assert!(matches!(intent.kind, VersionKind::Intent(_)));
    }

    #[test]
    fn intent_over_committed_version_is_rejected() {
        let json = r#"
        {
          "versions": [
            { "key": "c", "timestamp": { "wall_time": 4 }, "value": "committed" }
          ],
          "transactions": [
            {
              "id": "9f7c8b31-3f9d-4b0a-9c3c-6b8df92f7e11",
              "key": "c",
              "write_timestamp": { "wall_time": 4 }
            }
          ],
          "intents": [
            { "key": "c", "txn": "9f7c8b31-3f9d-4b0a-9c3c-6b8df92f7e11", "value": "c4" }
          ]
        }
        "#;

        let err = StoreDump::from_json(json)
            .unwrap()
            .into_store()
            .unwrap_err();
        assert!(matches!(err, DumpError::Store(StoreError::WriteRejected(_))));
    }

    #[test]
    fn intent_without_transaction_is_rejected() {
        let json = r#"
        {
          "intents": [
            { "key": "c", "txn": "9f7c8b31-3f9d-4b0a-9c3c-6b8df92f7e11", "value": "c4" }
          ]
        }
        "#;

        let err = StoreDump::from_json(json)
            .unwrap()
            .into_store()
            .unwrap_err();
        assert!(matches!(err, DumpError::UnknownTransaction { .. }));
    }
}
