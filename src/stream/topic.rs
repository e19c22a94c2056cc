//! Typed topic definitions: destination plus field parser.

use super::protocol::field_pairs;
use crate::types::OddsUpdate;

/// A subscribable destination and the parser for its message fields.
pub trait TopicSpec: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    /// Destination path the topic is addressed by.
    fn destination(&self) -> &str;

    /// Parse the `key=value` tokens of a `MESSAGE` frame. `None` drops it.
    fn parse(&self, fields: &[&str]) -> Option<Self::Output>;
}

/// Live odds updates on `/odds`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OddsTopic;

impl OddsTopic {
    pub const DESTINATION: &'static str = "/odds";
}

impl TopicSpec for OddsTopic {
    type Output = OddsUpdate;

    fn destination(&self) -> &str {
        Self::DESTINATION
    }

    fn parse(&self, fields: &[&str]) -> Option<OddsUpdate> {
        let mut match_id = None;
        let mut a = None;
        let mut b = None;
        for (key, value) in field_pairs(fields) {
            match key {
                "matchID" => match_id = value.parse::<i64>().ok(),
                "teamAOdds" => a = value.parse::<f64>().ok(),
                "teamBOdds" => b = value.parse::<f64>().ok(),
                _ => {}
            }
        }
        Some(OddsUpdate {
            match_id: match_id?,
            team_a_odds: a?,
            team_b_odds: b?,
        })
    }
}
