//! Bounded in-memory caches for rows and entities.

use crate::config::CacheConfig;
use crate::types::{odds_display, sort_by_start_desc, Match, Odds, OddsUpdate, Row};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Slot under which the row snapshot is cached.
const ROW_SNAPSHOT_KEY: &str = "match-list";

/// Single-slot snapshot store. Reads never fail; a miss is an empty snapshot.
pub trait RowCache: Send + Sync {
    fn read_snapshot(&self) -> Vec<Row>;
    fn write_snapshot(&self, rows: Vec<Row>);
}

fn capacity(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN)
}

/// Row snapshot held in an entry-bounded LRU under a fixed key.
pub struct LruRowCache {
    cache: Mutex<LruCache<&'static str, Vec<Row>>>,
}

impl LruRowCache {
    pub fn new(entries: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity(entries))),
        }
    }
}

impl RowCache for LruRowCache {
    fn read_snapshot(&self) -> Vec<Row> {
        self.cache.lock().get(ROW_SNAPSHOT_KEY).cloned().unwrap_or_default()
    }

    fn write_snapshot(&self, rows: Vec<Row>) {
        self.cache.lock().put(ROW_SNAPSHOT_KEY, rows);
    }
}

/// Matches by id.
pub struct MatchCache {
    cache: Mutex<LruCache<i64, Match>>,
}

impl MatchCache {
    pub fn new(entries: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity(entries))),
        }
    }

    pub fn seed(&self, matches: &[Match]) {
        let mut cache = self.cache.lock();
        for m in matches {
            cache.put(m.id, m.clone());
        }
    }

    /// Every cached match, in no particular order.
    pub fn snapshot(&self) -> Vec<Match> {
        self.cache.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Latest odds by match id. Last write wins.
pub struct OddsCache {
    cache: Mutex<LruCache<i64, Odds>>,
}

impl OddsCache {
    pub fn new(entries: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity(entries))),
        }
    }

    pub fn seed(&self, odds: &[Odds]) {
        let mut cache = self.cache.lock();
        for o in odds {
            cache.put(o.match_id, o.clone());
        }
    }

    pub fn apply(&self, update: &OddsUpdate) {
        self.cache.lock().put(update.match_id, Odds::from(update));
    }

    pub fn get(&self, match_id: i64) -> Option<Odds> {
        self.cache.lock().get(&match_id).cloned()
    }
}

/// The row snapshot together with the entity caches feeding it.
///
/// Reading the snapshot overlays the freshest cached odds and orders rows by
/// start time, so a cache-first render shows the latest known prices. With
/// no stored snapshot, rows are assembled from the cached matches.
pub struct EntityCaches {
    pub rows: LruRowCache,
    pub matches: MatchCache,
    pub odds: OddsCache,
}

impl EntityCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            rows: LruRowCache::new(config.row_entries),
            matches: MatchCache::new(config.match_entries),
            odds: OddsCache::new(config.odds_entries),
        }
    }
}

impl Default for EntityCaches {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl RowCache for EntityCaches {
    fn read_snapshot(&self) -> Vec<Row> {
        let mut rows = self.rows.read_snapshot();
        if rows.is_empty() && !self.matches.is_empty() {
            rows = self
                .matches
                .snapshot()
                .iter()
                .map(|m| Row::from_match(m, None))
                .collect();
        }
        for row in rows.iter_mut() {
            if let Some(odds) = self.odds.get(row.id.0) {
                row.odds_a = odds_display(odds.team_a_odds);
                row.odds_b = odds_display(odds.team_b_odds);
            }
        }
        sort_by_start_desc(&mut rows);
        rows
    }

    fn write_snapshot(&self, rows: Vec<Row>) {
        self.rows.write_snapshot(rows);
    }
}
