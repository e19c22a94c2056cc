//! Text frame protocol.
//!
//! Inbound:
//! - `CONNECTED`
//! - `MESSAGE <destination> k1=v1 k2=v2 ...`
//!
//! Outbound:
//! - `CONNECT`
//! - `SUBSCRIBE <destination>`
//! - `UNSUBSCRIBE <destination>`
//!
//! Tokens are separated by spaces; there is no escaping.

use std::fmt;

/// A recognized inbound frame, borrowing from the raw text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame<'a> {
    Connected,
    Message {
        destination: &'a str,
        fields: Vec<&'a str>,
    },
}

/// Parse a raw inbound line. Unknown events and short frames yield `None`.
pub fn parse_frame(text: &str) -> Option<InboundFrame<'_>> {
    let mut tokens = text.split_ascii_whitespace();
    match tokens.next()? {
        "CONNECTED" => Some(InboundFrame::Connected),
        "MESSAGE" => {
            let destination = tokens.next()?;
            Some(InboundFrame::Message {
                destination,
                fields: tokens.collect(),
            })
        }
        _ => None,
    }
}

/// Split `key=value` tokens. Tokens without exactly one `=` are skipped.
pub fn field_pairs<'a>(fields: &'a [&'a str]) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    fields.iter().filter_map(|field| {
        let mut parts = field.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) if !key.is_empty() && !value.is_empty() => {
                Some((key, value))
            }
            _ => None,
        }
    })
}

/// Frames the client sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFrame::Connect => write!(f, "CONNECT"),
            OutboundFrame::Subscribe(destination) => write!(f, "SUBSCRIBE {}", destination),
            OutboundFrame::Unsubscribe(destination) => write!(f, "UNSUBSCRIBE {}", destination),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connected() {
        assert_eq!(parse_frame("CONNECTED"), Some(InboundFrame::Connected));
        assert_eq!(parse_frame("CONNECTED\n"), Some(InboundFrame::Connected));
    }

    #[test]
    fn test_parse_message() {
        let frame = parse_frame("MESSAGE /odds matchID=1 teamAOdds=1.90").unwrap();
        assert_eq!(
            frame,
            InboundFrame::Message {
                destination: "/odds",
                fields: vec!["matchID=1", "teamAOdds=1.90"],
            }
        );
    }

    #[test]
    fn test_malformed_frames_dropped() {
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame("MESSAGE"), None);
        assert_eq!(parse_frame("HEARTBEAT /odds"), None);
        assert_eq!(parse_frame("message /odds a=1"), None);
    }

    #[test]
    fn test_field_pairs_skip_bad_tokens() {
        let fields = ["a=1", "b", "c=2=3", "=4", "d=", "e=5"];
        let pairs: Vec<_> = field_pairs(&fields).collect();
        assert_eq!(pairs, vec![("a", "1"), ("e", "5")]);
    }

    #[test]
    fn test_outbound_encoding() {
        assert_eq!(OutboundFrame::Connect.to_string(), "CONNECT");
        assert_eq!(OutboundFrame::Subscribe("/odds".into()).to_string(), "SUBSCRIBE /odds");
        assert_eq!(OutboundFrame::Unsubscribe("/odds".into()).to_string(), "UNSUBSCRIBE /odds");
    }
}
