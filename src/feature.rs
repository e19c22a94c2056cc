//! Consumer-facing match list.
//!
//! [`MatchList`] runs the whole pipeline: a cache-first snapshot sequence
//! feeds the reconcile worker, while pushed odds go through the per-key
//! throttle and land as single-row updates on the same held collection.

use crate::config::SyncConfig;
use crate::reconcile::{BudgetedPatcher, CycleReport, ReconcileWorker};
use crate::snapshot::{
    EntityCaches, EntityFeed, FeedSnapshotSource, LiveMode, RowCache, SnapshotEvent,
    SnapshotFetcher, SnapshotSequence, SnapshotStream,
};
use crate::stream::{OddsTopic, TopicStream, TopicSubscription};
use crate::throttle::ThrottleRunner;
use crate::types::{OddsUpdate, Row, RowId};
use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Mutation applied to the held rows, in application order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEvent {
    /// A budgeted patch converged.
    Patched {
        removed: usize,
        inserted: usize,
        /// Indices whose content was overwritten.
        updated: Vec<usize>,
    },
    /// The collection was replaced wholesale.
    Replaced { len: usize },
    /// One row's odds changed from a pushed update.
    RowUpdated { index: usize, id: RowId },
}

#[derive(Default)]
struct Status {
    is_loading: bool,
    last_error: Option<String>,
}

type Listeners = Arc<Mutex<Vec<Sender<ListEvent>>>>;

fn broadcast(listeners: &Listeners, event: ListEvent) {
    listeners.lock().retain(|l| l.send(event.clone()).is_ok());
}

struct Pipeline {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

/// Live, ordered list of matches with their current odds.
///
/// `start` begins loading; `stop` tears everything down. Both may be called
/// any number of times.
pub struct MatchList {
    /// Reconcile settings and throttle window.
    config: SyncConfig,

    /// The held collection.
    rows: Arc<Mutex<Vec<Row>>>,

    status: Arc<RwLock<Status>>,

    listeners: Listeners,

    caches: Arc<EntityCaches>,

    fetcher: Arc<dyn SnapshotFetcher>,

    stream: TopicStream,

    /// Re-fetch interval after the first snapshot; `None` loads once.
    refresh: Option<Duration>,

    pipeline: Mutex<Option<Pipeline>>,
}

impl MatchList {
    pub fn new(
        config: SyncConfig,
        caches: Arc<EntityCaches>,
        fetcher: Arc<dyn SnapshotFetcher>,
        stream: TopicStream,
    ) -> Self {
        Self {
            config,
            rows: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(RwLock::new(Status::default())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            caches,
            fetcher,
            stream,
            refresh: None,
            pipeline: Mutex::new(None),
        }
    }

    /// Build caches from `config` and fetch through `feed`.
    pub fn from_feed<F: EntityFeed + 'static>(
        config: SyncConfig,
        feed: F,
        stream: TopicStream,
    ) -> Self {
        let caches = Arc::new(EntityCaches::new(&config.cache));
        let fetcher = Arc::new(FeedSnapshotSource::new(feed, Arc::clone(&caches)));
        Self::new(config, caches, fetcher, stream)
    }

    /// Keep re-fetching every `cache.refresh_interval_ms` after the first
    /// snapshot.
    pub fn with_refresh(mut self) -> Self {
        self.refresh = Some(self.config.cache.refresh_interval());
        self
    }

    /// Current rows, newest match first.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.status.read().is_loading
    }

    /// Description of the most recent failure since the last `start`.
    pub fn last_error(&self) -> Option<String> {
        self.status.read().last_error.clone()
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.lock().is_some()
    }

    pub fn caches(&self) -> &Arc<EntityCaches> {
        &self.caches
    }

    /// Receive every subsequent mutation of the rows.
    pub fn changes(&self) -> Receiver<ListEvent> {
        let (tx, rx) = unbounded();
        self.listeners.lock().push(tx);
        rx
    }

    /// Start (or restart) the pipeline.
    ///
    /// A failure to open the odds subscription is recorded in `last_error`;
    /// snapshots still load.
    pub fn start(&self) {
        self.stop();
        {
            let mut status = self.status.write();
            status.is_loading = true;
            status.last_error = None;
        }

        let status = Arc::clone(&self.status);
        let listeners = Arc::clone(&self.listeners);
        let reconcile = ReconcileWorker::spawn(
            Arc::clone(&self.rows),
            BudgetedPatcher::new(self.config.reconcile.max_operations),
            move |report| {
                status.write().is_loading = false;
                if let Some(event) = list_event(report) {
                    broadcast(&listeners, event);
                }
            },
        );

        let subscription = match self.stream.subscribe(OddsTopic) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(error = %e, "odds subscription failed");
                self.status.write().last_error = Some(e.to_string());
                None
            }
        };

        let mode = match self.refresh {
            Some(interval) => LiveMode::Refresh(interval),
            None => LiveMode::OneShot,
        };
        let cache: Arc<dyn RowCache> = Arc::clone(&self.caches) as Arc<dyn RowCache>;
        let sequence = SnapshotStream::new(cache, Arc::clone(&self.fetcher), mode).open();
        let (throttle, throttled) = ThrottleRunner::with_channel(self.config.throttle.window());

        let worker = PipelineWorker {
            rows: Arc::clone(&self.rows),
            status: Arc::clone(&self.status),
            listeners: Arc::clone(&self.listeners),
            caches: Arc::clone(&self.caches),
            sequence,
            subscription,
            throttle,
            throttled,
            reconcile,
        };

        let (stop, stopped) = bounded(1);
        let handle = thread::Builder::new()
            .name("rowsync-match-list".into())
            .spawn(move || worker.run(stopped));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn match list pipeline");
                let mut status = self.status.write();
                status.is_loading = false;
                status.last_error = Some(e.to_string());
                None
            }
        };

        info!("match list started");
        *self.pipeline.lock() = Some(Pipeline { stop, handle });
    }

    /// Cancel the snapshot sequence, the odds subscription, pending throttle
    /// windows and the reconcile worker. Rows are kept. Idempotent.
    pub fn stop(&self) {
        let Some(mut pipeline) = self.pipeline.lock().take() else {
            return;
        };
        let _ = pipeline.stop.send(());
        if let Some(handle) = pipeline.handle.take() {
            let _ = handle.join();
        }
        self.status.write().is_loading = false;
        info!("match list stopped");
    }
}

impl Drop for MatchList {
    fn drop(&mut self) {
        self.stop();
    }
}

fn list_event(report: CycleReport) -> Option<ListEvent> {
    match report {
        CycleReport::Patched {
            removed: 0,
            inserted: 0,
            ref updated,
        } if updated.is_empty() => None,
        CycleReport::Patched {
            removed,
            inserted,
            updated,
        } => Some(ListEvent::Patched {
            removed,
            inserted,
            updated,
        }),
        CycleReport::Replaced { len } => Some(ListEvent::Replaced { len }),
    }
}

/// Owns every running part of one `start`. Dropping it tears them down.
struct PipelineWorker {
    rows: Arc<Mutex<Vec<Row>>>,
    status: Arc<RwLock<Status>>,
    listeners: Listeners,
    caches: Arc<EntityCaches>,
    sequence: SnapshotSequence,
    subscription: Option<TopicSubscription<OddsUpdate>>,
    throttle: ThrottleRunner<RowId, OddsUpdate>,
    throttled: Receiver<(RowId, OddsUpdate)>,
    reconcile: ReconcileWorker,
}

impl PipelineWorker {
    fn run(self, stop: Receiver<()>) {
        let mut snapshots = self.sequence.receiver().clone();
        let mut updates = match &self.subscription {
            Some(subscription) => subscription.receiver().clone(),
            None => never(),
        };

        loop {
            select! {
                recv(stop) -> _ => break,
                recv(snapshots) -> event => match event {
                    Ok(SnapshotEvent::Snapshot { rows, origin }) => {
                        debug!(?origin, rows = rows.len(), "snapshot received");
                        self.reconcile.submit(rows);
                    }
                    Ok(SnapshotEvent::Failed(e)) => {
                        let mut status = self.status.write();
                        status.last_error = Some(e.to_string());
                        status.is_loading = false;
                    }
                    Err(_) => snapshots = never(),
                },
                recv(updates) -> update => match update {
                    Ok(update) => self.throttle.submit(RowId(update.match_id), update),
                    Err(_) => updates = never(),
                },
                recv(self.throttled) -> item => {
                    if let Ok((id, update)) = item {
                        self.apply_update(id, &update);
                    }
                },
            }
        }
        debug!("match list pipeline stopped");
    }

    fn apply_update(&self, id: RowId, update: &OddsUpdate) {
        self.caches.odds.apply(update);

        let changed = {
            let mut rows = self.rows.lock();
            match rows.iter().position(|r| r.id == id) {
                Some(index) => {
                    let before = rows[index].clone();
                    rows[index].apply_odds(update);
                    (rows[index] != before).then_some(index)
                }
                None => {
                    trace!(%id, "odds for row not in list");
                    None
                }
            }
        };
        if let Some(index) = changed {
            broadcast(&self.listeners, ListEvent::RowUpdated { index, id });
        }
    }
}
