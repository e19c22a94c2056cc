//! Fetching authoritative snapshots from the entity API.

use super::cache::{EntityCaches, RowCache};
use super::cancel::CancelToken;
use crate::error::FetchError;
use crate::types::{sort_by_start_desc, Match, Odds, Row};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

pub const MATCHES_PATH: &str = "/api/matches";
pub const ODDS_PATH: &str = "/api/odds";

/// Entity endpoints. Both calls observe `cancel` and return
/// `FetchError::Cancelled` when it fires mid-flight.
pub trait EntityFeed: Send + Sync {
    fn fetch_matches(&self, cancel: &CancelToken) -> Result<Vec<Match>, FetchError>;
    fn fetch_odds(&self, cancel: &CancelToken) -> Result<Vec<Odds>, FetchError>;
}

/// Raw body retrieval for a path. Implementations map non-2xx responses to
/// `FetchError::Status`.
pub trait BodyFetcher: Send + Sync {
    fn get(&self, path: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError>;
}

/// [`EntityFeed`] that decodes JSON bodies from a [`BodyFetcher`].
pub struct JsonEntityFeed<B> {
    body: B,
}

impl<B: BodyFetcher> JsonEntityFeed<B> {
    pub fn new(body: B) -> Self {
        Self { body }
    }

    fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<T, FetchError> {
        let bytes = self.body.get(path, cancel)?;
        cancel.check()?;
        let decoded = serde_json::from_slice(&bytes)?;
        Ok(decoded)
    }
}

impl<B: BodyFetcher> EntityFeed for JsonEntityFeed<B> {
    fn fetch_matches(&self, cancel: &CancelToken) -> Result<Vec<Match>, FetchError> {
        self.fetch(MATCHES_PATH, cancel)
    }

    fn fetch_odds(&self, cancel: &CancelToken) -> Result<Vec<Odds>, FetchError> {
        self.fetch(ODDS_PATH, cancel)
    }
}

/// In-memory feed with optional latency and a forced failure.
#[derive(Clone, Default)]
pub struct FixtureFeed {
    matches: Vec<Match>,
    odds: Vec<Odds>,
    latency: Duration,
    failure: Option<FetchError>,
}

impl FixtureFeed {
    pub fn new(matches: Vec<Match>, odds: Vec<Odds>) -> Self {
        Self {
            matches,
            odds,
            latency: Duration::ZERO,
            failure: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(mut self, error: FetchError) -> Self {
        self.failure = Some(error);
        self
    }

    fn respond<T: Clone>(&self, items: &[T], cancel: &CancelToken) -> Result<Vec<T>, FetchError> {
        if !self.latency.is_zero() {
            cancel.sleep(self.latency)?;
        }
        cancel.check()?;
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(items.to_vec()),
        }
    }
}

impl EntityFeed for FixtureFeed {
    fn fetch_matches(&self, cancel: &CancelToken) -> Result<Vec<Match>, FetchError> {
        self.respond(&self.matches, cancel)
    }

    fn fetch_odds(&self, cancel: &CancelToken) -> Result<Vec<Odds>, FetchError> {
        self.respond(&self.odds, cancel)
    }
}

/// Join matches with odds (last odds entry per match wins) and order rows
/// by start time, newest first. Matches without odds render as missing.
pub fn assemble_rows(matches: &[Match], odds: &[Odds]) -> Vec<Row> {
    let by_match: HashMap<i64, &Odds> = odds.iter().map(|o| (o.match_id, o)).collect();
    let mut rows: Vec<Row> = matches
        .iter()
        .map(|m| Row::from_match(m, by_match.get(&m.id).copied()))
        .collect();
    sort_by_start_desc(&mut rows);
    rows
}

/// Produces one authoritative snapshot per call.
pub trait SnapshotFetcher: Send + Sync {
    fn fetch_snapshot(&self, cancel: &CancelToken) -> Result<Vec<Row>, FetchError>;
}

/// Fetches matches and odds concurrently, joins them, and writes the result
/// through to the caches.
pub struct FeedSnapshotSource<F> {
    feed: F,
    caches: Arc<EntityCaches>,
}

impl<F: EntityFeed> FeedSnapshotSource<F> {
    pub fn new(feed: F, caches: Arc<EntityCaches>) -> Self {
        Self { feed, caches }
    }

    pub fn caches(&self) -> &Arc<EntityCaches> {
        &self.caches
    }
}

impl<F: EntityFeed> SnapshotFetcher for FeedSnapshotSource<F> {
    fn fetch_snapshot(&self, cancel: &CancelToken) -> Result<Vec<Row>, FetchError> {
        cancel.check()?;
        // Cancelled when either leg fails, so the other stops early.
        let legs = cancel.child();
        let (matches, odds) = thread::scope(|scope| {
            let odds = scope.spawn(|| {
                let odds = self.feed.fetch_odds(&legs);
                if odds.is_err() {
                    legs.cancel();
                }
                odds
            });
            let matches = self.feed.fetch_matches(&legs);
            if matches.is_err() {
                legs.cancel();
            }
            let odds = odds
                .join()
                .unwrap_or_else(|_| Err(FetchError::Request("odds fetch panicked".into())));
            (matches, odds)
        });
        legs.cancel();
        let (matches, odds) = match (matches, odds) {
            (Ok(matches), Ok(odds)) => (matches, odds),
            // Report the leg that failed, not the one it cut short.
            (Err(FetchError::Cancelled), Err(e)) | (Err(e), _) | (_, Err(e)) => return Err(e),
        };
        cancel.check()?;

        debug!(matches = matches.len(), odds = odds.len(), "fetched entities");
        self.caches.matches.seed(&matches);
        self.caches.odds.seed(&odds);

        let rows = assemble_rows(&matches, &odds);
        self.caches.rows.write_snapshot(rows.clone());
        info!(rows = rows.len(), "snapshot fetched");
        Ok(rows)
    }
}
