//! Core types for the row collection and its sources.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder shown when a row has no known odds.
pub const MISSING_ODDS: &str = "—";

/// Stable identity of a row (the match id).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One displayed entry of the held collection.
///
/// Identity is `id`; every other field is mutable content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub team_a: String,
    pub team_b: String,
    pub time: String,
    pub odds_a: String,
    pub odds_b: String,
}

impl Row {
    /// Build a row from a match and its (possibly missing) odds.
    pub fn from_match(m: &Match, odds: Option<&Odds>) -> Self {
        let (a, b) = odds
            .map(|o| (o.team_a_odds, o.team_b_odds))
            .unwrap_or((f64::NAN, f64::NAN));
        Self {
            id: RowId(m.id),
            team_a: m.team_a.clone(),
            team_b: m.team_b.clone(),
            time: m.start_time.clone(),
            odds_a: odds_display(a),
            odds_b: odds_display(b),
        }
    }

    /// Overwrite the odds columns with a pushed update.
    pub fn apply_odds(&mut self, update: &OddsUpdate) {
        self.odds_a = odds_display(update.team_a_odds);
        self.odds_b = odds_display(update.team_b_odds);
    }
}

/// A scheduled match as served by the snapshot API.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
    #[serde(rename = "matchID")]
    pub id: i64,
    #[serde(rename = "teamA")]
    pub team_a: String,
    #[serde(rename = "teamB")]
    pub team_b: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
}

/// Current odds for a match as served by the snapshot API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Odds {
    #[serde(rename = "matchID")]
    pub match_id: i64,
    #[serde(rename = "teamAOdds")]
    pub team_a_odds: f64,
    #[serde(rename = "teamBOdds")]
    pub team_b_odds: f64,
}

/// A pushed replace-whole-value odds update. Latest received wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OddsUpdate {
    #[serde(rename = "matchID")]
    pub match_id: i64,
    #[serde(rename = "teamAOdds")]
    pub team_a_odds: f64,
    #[serde(rename = "teamBOdds")]
    pub team_b_odds: f64,
}

impl From<&OddsUpdate> for Odds {
    fn from(u: &OddsUpdate) -> Self {
        Odds {
            match_id: u.match_id,
            team_a_odds: u.team_a_odds,
            team_b_odds: u.team_b_odds,
        }
    }
}

/// Format an odds value for display: two decimals, or a placeholder when
/// the value is not finite.
pub fn odds_display(value: f64) -> String {
    if value.is_finite() {
        format!("{:.2}", value)
    } else {
        MISSING_ODDS.to_string()
    }
}

/// Sort rows most recent start time first. Times are ISO-8601 UTC strings,
/// so lexicographic order is chronological. Stable for equal times.
pub fn sort_by_start_desc(rows: &mut [Row]) {
    rows.sort_by(|a, b| b.time.cmp(&a.time));
}
