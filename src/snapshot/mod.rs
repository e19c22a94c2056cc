//! Snapshot production: cache-first reads, concurrent entity fetches with
//! write-through, and an optional live tail.

mod cache;
mod cancel;
mod source;
mod stream;

pub use cache::{EntityCaches, LruRowCache, MatchCache, OddsCache, RowCache};
pub use cancel::CancelToken;
pub use source::{
    assemble_rows, BodyFetcher, EntityFeed, FeedSnapshotSource, FixtureFeed, JsonEntityFeed,
    SnapshotFetcher, MATCHES_PATH, ODDS_PATH,
};
pub use stream::{LiveMode, SnapshotEvent, SnapshotOrigin, SnapshotSequence, SnapshotStream};
