//! Cache-first snapshot sequence: cached rows, then fetched rows, then live.

use super::cache::RowCache;
use super::cancel::CancelToken;
use super::source::SnapshotFetcher;
use crate::error::FetchError;
use crate::types::Row;
use crossbeam_channel::{select, unbounded, Receiver, RecvError, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Where an emitted snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Cache,
    Fetch,
    Upstream,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Snapshot { rows: Vec<Row>, origin: SnapshotOrigin },
    /// Terminal. Nothing follows a failure.
    Failed(FetchError),
}

/// What happens after the first fetched snapshot.
pub enum LiveMode {
    /// Complete after the fetch.
    OneShot,
    /// Forward every snapshot an upstream producer sends, until it hangs up.
    Forward(Receiver<Vec<Row>>),
    /// Re-fetch on a fixed interval.
    Refresh(Duration),
}

/// Composes a row cache and a fetcher into one ordered snapshot sequence.
///
/// A non-empty cache read is emitted first, then the fetch result. A fetch
/// failure ends the sequence with [`SnapshotEvent::Failed`]; anything the
/// cache already produced stays delivered.
pub struct SnapshotStream {
    cache: Arc<dyn RowCache>,
    fetcher: Arc<dyn SnapshotFetcher>,
    mode: LiveMode,
}

impl SnapshotStream {
    pub fn new(
        cache: Arc<dyn RowCache>,
        fetcher: Arc<dyn SnapshotFetcher>,
        mode: LiveMode,
    ) -> Self {
        Self { cache, fetcher, mode }
    }

    /// Start producing on a background thread.
    pub fn open(self) -> SnapshotSequence {
        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        let producer_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name("rowsync-snapshot".to_string())
            .spawn(move || self.produce(&producer_cancel, &tx));
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn snapshot producer");
        }
        SnapshotSequence { events: rx, cancel }
    }

    fn produce(self, cancel: &CancelToken, tx: &Sender<SnapshotEvent>) {
        let SnapshotStream { cache, fetcher, mode } = self;
        let cached = cache.read_snapshot();
        if !cached.is_empty() && !emit(cancel, tx, cached, SnapshotOrigin::Cache) {
            return;
        }
        if !fetch_and_emit(fetcher.as_ref(), cancel, tx) {
            return;
        }

        match mode {
            LiveMode::OneShot => {}
            LiveMode::Forward(upstream) => loop {
                select! {
                    recv(upstream) -> msg => match msg {
                        Ok(rows) => {
                            if !emit(cancel, tx, rows, SnapshotOrigin::Upstream) {
                                return;
                            }
                        }
                        Err(_) => break,
                    },
                    recv(cancel.signal()) -> _ => break,
                }
            },
            LiveMode::Refresh(interval) => {
                while cancel.sleep(interval).is_ok() {
                    if !fetch_and_emit(fetcher.as_ref(), cancel, tx) {
                        break;
                    }
                }
            }
        }
        debug!("snapshot sequence complete");
    }
}

/// `false` when the sequence must end.
fn fetch_and_emit(
    fetcher: &dyn SnapshotFetcher,
    cancel: &CancelToken,
    tx: &Sender<SnapshotEvent>,
) -> bool {
    match fetcher.fetch_snapshot(cancel) {
        Ok(rows) => emit(cancel, tx, rows, SnapshotOrigin::Fetch),
        Err(FetchError::Cancelled) => false,
        Err(e) => {
            if !cancel.is_cancelled() {
                warn!(error = %e, "snapshot fetch failed");
                let _ = tx.send(SnapshotEvent::Failed(e));
            }
            false
        }
    }
}

fn emit(
    cancel: &CancelToken,
    tx: &Sender<SnapshotEvent>,
    rows: Vec<Row>,
    origin: SnapshotOrigin,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tx.send(SnapshotEvent::Snapshot { rows, origin }).is_ok()
}

/// Consumer end of an open [`SnapshotStream`]. Closing or dropping it
/// cancels any in-flight fetch.
pub struct SnapshotSequence {
    events: Receiver<SnapshotEvent>,
    cancel: CancelToken,
}

impl SnapshotSequence {
    pub fn recv(&self) -> Result<SnapshotEvent, RecvError> {
        self.events.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<SnapshotEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    pub fn receiver(&self) -> &Receiver<SnapshotEvent> {
        &self.events
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(self) {}
}

impl Drop for SnapshotSequence {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::cache::LruRowCache;
    use crate::types::{Match, RowId};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn row(id: i64) -> Row {
        Row::from_match(
            &Match {
                id,
                team_a: "A".into(),
                team_b: "B".into(),
                start_time: format!("2025-07-0{id}T00:00:00Z"),
            },
            None,
        )
    }

    struct Scripted {
        results: Mutex<Vec<Result<Vec<Row>, FetchError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<Result<Vec<Row>, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl SnapshotFetcher for Scripted {
        fn fetch_snapshot(&self, _cancel: &CancelToken) -> Result<Vec<Row>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock();
            if results.is_empty() {
                Ok(Vec::new())
            } else {
                results.remove(0)
            }
        }
    }

    struct Blocking;

    impl SnapshotFetcher for Blocking {
        fn fetch_snapshot(&self, cancel: &CancelToken) -> Result<Vec<Row>, FetchError> {
            cancel.sleep(Duration::from_secs(30))?;
            Ok(Vec::new())
        }
    }

    fn collect(sequence: &SnapshotSequence) -> Vec<SnapshotEvent> {
        let mut events = Vec::new();
        while let Ok(event) = sequence.recv_timeout(Duration::from_secs(2)) {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_empty_cache_skipped() {
        let cache = Arc::new(LruRowCache::new(4));
        let fetcher = Scripted::new(vec![Ok(vec![row(1)])]);
        let sequence = SnapshotStream::new(cache, fetcher, LiveMode::OneShot).open();

        let events = collect(&sequence);
        assert_eq!(
            events,
            vec![SnapshotEvent::Snapshot {
                rows: vec![row(1)],
                origin: SnapshotOrigin::Fetch
            }]
        );
    }

    #[test]
    fn test_cache_then_fetch() {
        let cache = Arc::new(LruRowCache::new(4));
        cache.write_snapshot(vec![row(2)]);
        let fetcher = Scripted::new(vec![Ok(vec![row(1), row(2)])]);
        let sequence = SnapshotStream::new(cache, fetcher, LiveMode::OneShot).open();

        let events = collect(&sequence);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SnapshotEvent::Snapshot { origin: SnapshotOrigin::Cache, rows }
                if rows[0].id == RowId(2)
        ));
        assert!(matches!(
            &events[1],
            SnapshotEvent::Snapshot { origin: SnapshotOrigin::Fetch, rows } if rows.len() == 2
        ));
    }

    #[test]
    fn test_failure_after_cache() {
        let cache = Arc::new(LruRowCache::new(4));
        cache.write_snapshot(vec![row(2)]);
        let fetcher = Scripted::new(vec![Err(FetchError::Status { status: 503 })]);
        let sequence = SnapshotStream::new(cache, fetcher, LiveMode::OneShot).open();

        let events = collect(&sequence);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SnapshotEvent::Failed(FetchError::Status { status: 503 }));
    }

    #[test]
    fn test_forward_until_upstream_closes() {
        let cache = Arc::new(LruRowCache::new(4));
        let fetcher = Scripted::new(vec![Ok(vec![row(1)])]);
        let (upstream_tx, upstream_rx) = unbounded();
        upstream_tx.send(vec![row(1), row(2)]).unwrap();
        upstream_tx.send(vec![row(2)]).unwrap();
        drop(upstream_tx);

        let sequence = SnapshotStream::new(cache, fetcher, LiveMode::Forward(upstream_rx)).open();
        let origins: Vec<_> = collect(&sequence)
            .into_iter()
            .map(|e| match e {
                SnapshotEvent::Snapshot { origin, .. } => origin,
                SnapshotEvent::Failed(_) => panic!("unexpected failure"),
            })
            .collect();
        assert_eq!(
            origins,
            vec![SnapshotOrigin::Fetch, SnapshotOrigin::Upstream, SnapshotOrigin::Upstream]
        );
    }

    #[test]
    fn test_refresh_refetches() {
        let cache = Arc::new(LruRowCache::new(4));
        let fetcher = Scripted::new(vec![
            Ok(vec![row(1)]),
            Ok(vec![row(2)]),
            Err(FetchError::Request("down".into())),
        ]);
        let mode = LiveMode::Refresh(Duration::from_millis(10));
        let sequence = SnapshotStream::new(cache, fetcher.clone(), mode).open();

        let events = collect(&sequence);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], SnapshotEvent::Failed(FetchError::Request(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_close_cancels_fetch() {
        let cache = Arc::new(LruRowCache::new(4));
        let sequence = SnapshotStream::new(cache, Arc::new(Blocking), LiveMode::OneShot).open();
        let events = sequence.receiver().clone();

        sequence.close();
        // the producer exits without emitting once cancelled
        assert!(events.recv_timeout(Duration::from_secs(5)).is_err());
    }
}
