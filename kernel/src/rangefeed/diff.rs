// Diff Resolution
//
// Finds the value a key held immediately before a given revision.
// Lookups always ignore the scan's lower time bound: the previous
// revision of an in-window event usually lies at or below the start
// timestamp, and a bounded seek would skip forward to whatever
// in-window position comes next, possibly on another key.

use crate::mvcc::{StoreSnapshot, Timestamp, VersionKind};

use super::intent::IntentResolver;
use super::CatchUpError;

pub struct DiffResolver<'a, S: ?Sized> {
    snapshot: &'a S,
}

impl<'a, S: StoreSnapshot + ?Sized> DiffResolver<'a, S> {
    pub fn new(snapshot: &'a S) -> Self {
        Self { snapshot }
    }

    /// Value of the newest revision of `key` strictly older than
    /// `reference`, or `None` if there is none.
    ///
    /// An older intent resolves to its provisional value. Omission flags
    /// are not applied: they only govern emission.
    pub fn previous_value(
        &self,
        key: &[u8],
        reference: Timestamp,
    ) -> Result<Option<Vec<u8>>, CatchUpError> {
        let bound = reference.prev();
        if bound.is_empty() {
            return Ok(None);
        }

        let Some(found) = self.snapshot.value_at_or_before(key, bound, true)? else {
            return Ok(None);
        };
        if found.key != key {
            return Ok(None);
        }
        if found.timestamp.is_empty() {
            return Err(CatchUpError::inline_value(key));
        }
        if found.timestamp > bound {
            return Err(CatchUpError::UnsupportedLayout(format!(
                "lookup below {} returned newer revision {}",
                reference, found.timestamp
            )));
        }

        match found.kind {
            VersionKind::Value(value) => Ok(Some(value.raw_bytes)),
            VersionKind::Intent(marker) => {
                let resolved =
                    IntentResolver::new(self.snapshot).resolve(key, found.timestamp, &marker)?;
                Ok(Some(resolved.provisional_value))
            }
            VersionKind::Inline(_) => Err(CatchUpError::inline_value(key)),
        }
    }
}
