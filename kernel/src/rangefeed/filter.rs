// Emission Filtering
//
// Decides, per raw position, whether the forward scan emits it.
// Pure and side-effect free; diff lookups never go through here.

use crate::mvcc::{MvccValue, TimeWindow, Timestamp};

use super::intent::ResolvedIntent;
use super::{CatchUpStats, IntentPolicy};

/// Why a position produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// At or below the exclusive start timestamp.
    BelowWindow,
    /// Above the inclusive end timestamp.
    AboveWindow,
    /// Written by a transaction excluded from feeds.
    Omitted,
    /// Intent left for the live feed.
    IntentPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Emit,
    Skip(SkipReason),
}

/// Window check shared by committed values and intents.
pub fn window_skip(window: &TimeWindow, timestamp: Timestamp) -> Option<SkipReason> {
    if window.is_below(timestamp) {
        Some(SkipReason::BelowWindow)
    } else if window.is_above(timestamp) {
        Some(SkipReason::AboveWindow)
    } else {
        None
    }
}

pub fn classify_committed(
    window: &TimeWindow,
    timestamp: Timestamp,
    value: &MvccValue,
) -> Disposition {
    if let Some(reason) = window_skip(window, timestamp) {
        return Disposition::Skip(reason);
    }
    if value.omit_in_rangefeeds {
        return Disposition::Skip(SkipReason::Omitted);
    }
    Disposition::Emit
}

/// Classify an in-window intent once its owner is known.
///
/// Omission wins over the policy so omitted writes are counted as such.
pub fn classify_intent(policy: IntentPolicy, intent: &ResolvedIntent) -> Disposition {
    if intent.omitted() {
        return Disposition::Skip(SkipReason::Omitted);
    }
    match policy {
        IntentPolicy::Emit => Disposition::Emit,
        IntentPolicy::Skip => Disposition::Skip(SkipReason::IntentPolicy),
    }
}

impl CatchUpStats {
    pub(crate) fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::BelowWindow => self.skipped_below_window += 1,
            SkipReason::AboveWindow => self.skipped_above_window += 1,
            SkipReason::Omitted => self.omitted += 1,
            SkipReason::IntentPolicy => self.intents_skipped += 1,
        }
    }
}
