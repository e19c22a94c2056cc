//! Reconnecting topic stream over a text-framed push channel.
//!
//! - One logical connection shared by every subscriber
//! - Fan-out of each destination's messages to all its subscribers
//! - `SUBSCRIBE` on first subscriber, `UNSUBSCRIBE` when the last leaves
//! - Exponential-backoff reconnection that gives up silently after a ceiling
//!
//! # Example
//!
//! ```ignore
//! let (transport, _handle) = ScriptedTransport::new();
//! let stream = TopicStream::spawn(transport, StreamConfig::default());
//!
//! let odds = stream.subscribe(OddsTopic)?;
//! while let Ok(update) = odds.recv() {
//!     println!("{} -> {}/{}", update.match_id, update.team_a_odds, update.team_b_odds);
//! }
//! ```

mod backoff;
mod client;
mod protocol;
mod topic;
mod transport;

pub use backoff::ReconnectBackoff;
pub use client::{ConnectionState, SubscriberId, TopicStream, TopicSubscription};
pub use protocol::{field_pairs, parse_frame, InboundFrame, OutboundFrame};
pub use topic::{OddsTopic, TopicSpec};
pub use transport::{InboundSink, ScriptedHandle, ScriptedTransport, Transport};
