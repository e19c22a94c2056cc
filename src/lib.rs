//! # rowsync
//!
//! Keeps an ordered, uniquely-keyed list of rows in sync with a snapshot API
//! and a push channel of per-row updates.
//!
//! ## Core Concepts
//!
//! - **Topic stream**: one reconnecting connection, fanned out to typed subscribers
//! - **Snapshots**: cache first, then network, optionally refreshed or forwarded
//! - **Reconcile**: minimal diff applied under an operation budget, replacing the
//!   whole collection as fallback
//! - **Throttle**: trailing-edge, latest-wins, per key
//!
//! ## Example
//!
//! ```ignore
//! use rowsync::{MatchList, SyncConfig, TopicStream, FixtureFeed, ScriptedTransport};
//!
//! let config = SyncConfig::default();
//! let (transport, _handle) = ScriptedTransport::new();
//! let stream = TopicStream::spawn(transport, config.stream.clone());
//!
//! let list = MatchList::from_feed(config, FixtureFeed::new(matches, odds), stream);
//! let changes = list.changes();
//! list.start();
//!
//! for event in changes.iter() {
//!     render(&list.rows(), event);
//! }
//! ```

pub mod config;
pub mod error;
pub mod feature;
pub mod reconcile;
pub mod snapshot;
pub mod stream;
pub mod throttle;
pub mod types;

// Re-exports
pub use config::{CacheConfig, ReconcileConfig, StreamConfig, SyncConfig, ThrottleConfig};
pub use error::{FetchError, Result, SyncError, TransportError};
pub use feature::{ListEvent, MatchList};
pub use reconcile::{
    apply_patch, diff, BudgetedPatcher, CycleReport, Patch, PatchOutcome, ReconcileWorker,
};
pub use snapshot::{
    CancelToken, EntityCaches, EntityFeed, FeedSnapshotSource, FixtureFeed, JsonEntityFeed,
    LiveMode, RowCache, SnapshotEvent, SnapshotFetcher, SnapshotOrigin, SnapshotSequence,
    SnapshotStream,
};
pub use stream::{
    ConnectionState, OddsTopic, ScriptedHandle, ScriptedTransport, TopicSpec, TopicStream,
    TopicSubscription, Transport,
};
pub use throttle::{PerKeyThrottle, ThrottleRunner};
pub use types::{Match, Odds, OddsUpdate, Row, RowId};
