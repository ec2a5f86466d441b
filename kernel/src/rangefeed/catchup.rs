// Catch-Up Iterator
//
// Drives one forward pass over a span, classifies every raw position
// the store returns and pushes change events to a caller-supplied
// callback. The iterator owns exactly one snapshot and releases it on
// close or drop.

use tracing::{debug, info, warn};

use crate::mvcc::{
    pretty_key, Key, RawVersion, ScanBounds, Span, StoreSnapshot, TimeWindow, Timestamp,
    VersionKind, VersionedStore,
};

use super::diff::DiffResolver;
use super::filter::{self, Disposition};
use super::intent::IntentResolver;
use super::{
    CallbackError, CancelToken, CatchUpError, CatchUpOptions, CatchUpStats, ChangeEvent,
    IntentPolicy,
};

/// Backfill iterator over `(start, end]` of one span.
///
/// Usage:
/// - construct with `CatchUpIterator::new`
/// - call `catch_up_scan` once
/// - `close` (or drop) to release the snapshot
///
/// Not reusable after close, and not meant to be shared between threads.
pub struct CatchUpIterator<S: StoreSnapshot> {
    snapshot: Option<S>,
    span: Span,
    window: TimeWindow,
    intents: IntentPolicy,
    cancel: Option<CancelToken>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
    scanned: bool,
}

impl<S: StoreSnapshot> CatchUpIterator<S> {
    /// Capture a snapshot of `span` for a scan starting after `start`.
    pub fn new<V>(
        store: &V,
        span: Span,
        start: Timestamp,
        options: CatchUpOptions,
    ) -> Result<Self, CatchUpError>
    where
        V: VersionedStore<Snapshot = S> + ?Sized,
    {
        if !span.is_valid() {
            return Err(CatchUpError::InvalidSpan(format!(
                "{span} is empty or inverted"
            )));
        }
        if let Some(end) = options.end_timestamp {
            if end <= start {
                return Err(CatchUpError::InvalidWindow { start, end });
            }
        }

        let window = TimeWindow::new(start, options.end_timestamp);
        let snapshot = store
            .open_snapshot(&ScanBounds {
                span: span.clone(),
                window,
            })
            .map_err(CatchUpError::Resource)?;

        debug!(%span, %start, end = ?options.end_timestamp, intents = ?options.intents, "opened catch-up iterator");

        Ok(Self {
            snapshot: Some(snapshot),
            span,
            window,
            intents: options.intents,
            cancel: None,
            on_close: None,
            scanned: false,
        })
    }

    /// Stop the scan once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run `hook` once, when the snapshot is released.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn is_closed(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Replay the span, calling `on_event` for every change in key order
    /// and, within a key, in increasing timestamp order.
    ///
    /// With `with_diff`, each event carries the value of the revision
    /// immediately before it, read regardless of the start timestamp.
    ///
    /// The first error from the store, the layout checks or the callback
    /// aborts the scan and is returned unchanged.
    pub fn catch_up_scan<F>(
        &mut self,
        mut on_event: F,
        with_diff: bool,
    ) -> Result<CatchUpStats, CatchUpError>
    where
        F: FnMut(&ChangeEvent) -> Result<(), CallbackError>,
    {
        let Self {
            snapshot,
            span,
            window,
            intents,
            cancel,
            scanned,
            ..
        } = self;
        let snapshot = snapshot.as_mut().ok_or(CatchUpError::Closed)?;
        if *scanned {
            return Err(CatchUpError::AlreadyScanned);
        }
        *scanned = true;

        let scan = Scan {
            window: *window,
            intents: *intents,
            cancel: cancel.as_ref(),
            with_diff,
        };
        match scan.run(snapshot, &mut on_event) {
            Ok(stats) => {
                info!(
                    %span,
                    start = %window.start,
                    with_diff,
                    positions = stats.positions_read,
                    events = stats.events_emitted,
                    omitted = stats.omitted,
                    "catch-up scan complete"
                );
                Ok(stats)
            }
            Err(err) => {
                warn!(%span, error = %err, "catch-up scan aborted");
                Err(err)
            }
        }
    }

    /// Release the snapshot. Idempotent.
    pub fn close(&mut self) -> Result<(), CatchUpError> {
        let Some(mut snapshot) = self.snapshot.take() else {
            return Ok(());
        };
        let result = snapshot.close().map_err(CatchUpError::Resource);
        if let Some(hook) = self.on_close.take() {
            hook();
        }
        result
    }
}

impl<S: StoreSnapshot> Drop for CatchUpIterator<S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(span = %self.span, error = %err, "failed to release catch-up snapshot");
        }
    }
}

/// Settings of one scan pass.
struct Scan<'a> {
    window: TimeWindow,
    intents: IntentPolicy,
    cancel: Option<&'a CancelToken>,
    with_diff: bool,
}

impl Scan<'_> {
    fn run<S, F>(&self, snapshot: &mut S, on_event: &mut F) -> Result<CatchUpStats, CatchUpError>
    where
        S: StoreSnapshot,
        F: FnMut(&ChangeEvent) -> Result<(), CallbackError>,
    {
        let mut buffer = KeyBuffer::default();

        loop {
            if self.cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(CatchUpError::Cancelled);
            }
            let Some(raw) = snapshot.next_version()? else {
                break;
            };
            buffer.stats.positions_read += 1;

            let RawVersion {
                key,
                timestamp,
                kind,
            } = raw;
            if timestamp.is_empty() || matches!(kind, VersionKind::Inline(_)) {
                return Err(CatchUpError::inline_value(&key));
            }
            if buffer.advance(&key, timestamp)? {
                buffer.flush(on_event)?;
            }

            let value = match kind {
                VersionKind::Value(value) => {
                    match filter::classify_committed(&self.window, timestamp, &value) {
                        Disposition::Emit => value.raw_bytes,
                        Disposition::Skip(reason) => {
                            buffer.stats.record_skip(reason);
                            continue;
                        }
                    }
                }
                VersionKind::Intent(marker) => {
                    if let Some(reason) = filter::window_skip(&self.window, timestamp) {
                        buffer.stats.record_skip(reason);
                        continue;
                    }
                    let resolved =
                        IntentResolver::new(&*snapshot).resolve(&key, timestamp, &marker)?;
                    match filter::classify_intent(self.intents, &resolved) {
                        Disposition::Emit => resolved.provisional_value,
                        Disposition::Skip(reason) => {
                            debug!(
                                key = %pretty_key(&key),
                                %timestamp,
                                txn = %resolved.txn.id,
                                ?reason,
                                "skipping intent"
                            );
                            buffer.stats.record_skip(reason);
                            continue;
                        }
                    }
                }
                VersionKind::Inline(_) => return Err(CatchUpError::inline_value(&key)),
            };

            let prev_value = if self.with_diff {
                DiffResolver::new(&*snapshot).previous_value(&key, timestamp)?
            } else {
                None
            };
            buffer.pending.push(ChangeEvent {
                key,
                value,
                timestamp,
                prev_value,
                prev_timestamp: Timestamp::ZERO,
            });
        }

        buffer.flush(on_event)?;
        Ok(buffer.stats)
    }
}

/// Events of the key under the cursor, newest first.
#[derive(Default)]
struct KeyBuffer {
    current: Option<(Key, Timestamp)>,
    pending: Vec<ChangeEvent>,
    stats: CatchUpStats,
}

impl KeyBuffer {
    /// Record the cursor moving to `(key, timestamp)`.
    ///
    /// Returns `true` when the cursor entered a new key. Positions must
    /// ascend by key and strictly descend by timestamp within a key.
    fn advance(&mut self, key: &[u8], timestamp: Timestamp) -> Result<bool, CatchUpError> {
        let entered = match &self.current {
            None => true,
            Some((current, last)) if current.as_slice() == key => {
                if timestamp >= *last {
                    return Err(CatchUpError::UnsupportedLayout(format!(
                        "revision {} of {} does not precede {}",
                        timestamp,
                        pretty_key(key),
                        last
                    )));
                }
                false
            }
            Some((current, _)) if current.as_slice() > key => {
                return Err(CatchUpError::UnsupportedLayout(format!(
                    "key {} returned after {}",
                    pretty_key(key),
                    pretty_key(current)
                )));
            }
            Some(_) => true,
        };
        self.current = Some((key.to_vec(), timestamp));
        Ok(entered)
    }

    /// Deliver buffered events oldest first.
    fn flush<F>(&mut self, on_event: &mut F) -> Result<(), CatchUpError>
    where
        F: FnMut(&ChangeEvent) -> Result<(), CallbackError>,
    {
        if let Some(first) = self.pending.first() {
            debug!(
                key = %pretty_key(&first.key),
                events = self.pending.len(),
                "flushing key"
            );
        }
        while let Some(event) = self.pending.pop() {
            on_event(&event).map_err(CatchUpError::Callback)?;
            self.stats.events_emitted += 1;
        }
        Ok(())
    }
}
