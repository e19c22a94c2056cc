//! Push transport boundary.
//!
//! The raw socket lives outside this crate. A [`Transport`] connects, sends
//! text frames, and reports inbound lines and failures through the
//! [`InboundSink`] it was handed on connect.

use crate::error::TransportError;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) enum InboundEvent {
    Frame(String),
    Failed(String),
}

pub(crate) struct Inbound {
    pub generation: u64,
    pub event: InboundEvent,
}

/// Where a transport delivers inbound traffic for one connection.
///
/// Each connection attempt gets a fresh sink; events from a superseded
/// connection are ignored by the client.
#[derive(Clone)]
pub struct InboundSink {
    generation: u64,
    tx: Sender<Inbound>,
}

impl InboundSink {
    pub(crate) fn new(generation: u64, tx: Sender<Inbound>) -> Self {
        Self { generation, tx }
    }

    /// Deliver a raw text line. Returns false once the client is gone.
    pub fn frame(&self, text: impl Into<String>) -> bool {
        self.deliver(InboundEvent::Frame(text.into()))
    }

    /// Report that the connection broke.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.deliver(InboundEvent::Failed(reason.into()))
    }

    fn deliver(&self, event: InboundEvent) -> bool {
        self.tx
            .send(Inbound {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A text-framed push connection.
///
/// Owned by the stream client's worker thread; calls are never concurrent.
pub trait Transport: Send + 'static {
    /// Open a connection delivering inbound traffic to `inbound`.
    fn connect(&mut self, inbound: InboundSink) -> Result<(), TransportError>;

    /// Send one text frame.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

#[derive(Default)]
struct Script {
    sink: Option<InboundSink>,
    sent: Vec<String>,
    connects: Vec<Instant>,
    closes: usize,
    fail_next: usize,
    fail_all: bool,
    fail_sends: bool,
    manual_handshake: bool,
}

/// In-memory transport for fixtures and tests.
///
/// Acknowledges every connect with `CONNECTED` unless told otherwise, and
/// records everything sent. Drive it through the paired [`ScriptedHandle`].
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

/// Control side of a [`ScriptedTransport`].
#[derive(Clone)]
pub struct ScriptedHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptedHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                script: Arc::clone(&script),
            },
            ScriptedHandle { script },
        )
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, inbound: InboundSink) -> Result<(), TransportError> {
        let mut script = self.script.lock();
        script.connects.push(Instant::now());
        if script.fail_all || script.fail_next > 0 {
            script.fail_next = script.fail_next.saturating_sub(1);
            return Err(TransportError::ConnectFailed("scripted refusal".into()));
        }
        if !script.manual_handshake {
            inbound.frame("CONNECTED");
        }
        script.sink = Some(inbound);
        Ok(())
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut script = self.script.lock();
        if script.sink.is_none() {
            return Err(TransportError::Closed);
        }
        if script.fail_sends {
            return Err(TransportError::SendFailed(format!("scripted refusal of {frame}")));
        }
        script.sent.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self) {
        let mut script = self.script.lock();
        if script.sink.take().is_some() {
            script.closes += 1;
        }
    }
}

impl ScriptedHandle {
    /// Deliver an inbound line on the open connection.
    pub fn push(&self, text: &str) -> bool {
        match &self.script.lock().sink {
            Some(sink) => sink.frame(text),
            None => false,
        }
    }

    /// Break the open connection.
    pub fn break_connection(&self, reason: &str) -> bool {
        match &self.script.lock().sink {
            Some(sink) => sink.fail(reason),
            None => false,
        }
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.script.lock().fail_next = n;
    }

    /// Refuse every connect attempt until switched off.
    pub fn fail_all_connects(&self, fail: bool) {
        self.script.lock().fail_all = fail;
    }

    /// Refuse every send on an open connection until switched off.
    pub fn fail_sends(&self, fail: bool) {
        self.script.lock().fail_sends = fail;
    }

    /// Stop auto-acknowledging connects; use `push("CONNECTED")` instead.
    pub fn manual_handshake(&self, manual: bool) {
        self.script.lock().manual_handshake = manual;
    }

    pub fn sent(&self) -> Vec<String> {
        self.script.lock().sent.clone()
    }

    pub fn count_sent(&self, frame: &str) -> usize {
        self.script.lock().sent.iter().filter(|f| *f == frame).count()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.script.lock().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.script.lock().connects.len()
    }

    pub fn close_count(&self) -> usize {
        self.script.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.script.lock().sink.is_some()
    }

    /// Poll `condition` until it holds or `timeout` passes.
    pub fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_scripted_connect_acknowledges() {
        let (mut transport, handle) = ScriptedTransport::new();
        let (tx, rx) = unbounded();
        transport.connect(InboundSink::new(1, tx)).unwrap();

        let inbound = rx.try_recv().unwrap();
        assert_eq!(inbound.generation, 1);
        assert!(matches!(inbound.event, InboundEvent::Frame(ref f) if f == "CONNECTED"));
        assert!(handle.is_open());
    }

    #[test]
    fn test_scripted_refusal_and_send_when_closed() {
        let (mut transport, handle) = ScriptedTransport::new();
        handle.fail_next_connects(1);
        let (tx, _rx) = unbounded();

        assert!(transport.connect(InboundSink::new(1, tx.clone())).is_err());
        assert_eq!(transport.send("CONNECT"), Err(TransportError::Closed));
        assert!(transport.connect(InboundSink::new(2, tx)).is_ok());
        assert!(transport.send("CONNECT").is_ok());
        assert_eq!(handle.sent(), vec!["CONNECT".to_string()]);
        assert_eq!(handle.connect_count(), 2);

        transport.close();
        transport.close();
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn test_scripted_send_refusal() {
        let (mut transport, handle) = ScriptedTransport::new();
        let (tx, _rx) = unbounded();
        transport.connect(InboundSink::new(1, tx)).unwrap();

        handle.fail_sends(true);
        assert!(matches!(transport.send("SUBSCRIBE /odds"), Err(TransportError::SendFailed(_))));
        assert!(handle.sent().is_empty());
    }
}
