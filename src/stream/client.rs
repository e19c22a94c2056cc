//! Reconnecting, topic-addressed stream client.
//!
//! A single worker thread owns the transport, connection state and the
//! subscription registry; handles talk to it over a command channel, so all
//! state changes are serialized in arrival order.

use super::backoff::ReconnectBackoff;
use super::protocol::{parse_frame, InboundFrame, OutboundFrame};
use super::topic::TopicSpec;
use super::transport::{Inbound, InboundEvent, InboundSink, Transport};
use crate::config::StreamConfig;
use crate::error::{Result, SyncError, TransportError};
use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Identifier of one logical subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

type Payload = Arc<dyn Any + Send + Sync>;
type Parser = Box<dyn Fn(&[&str]) -> Option<Payload> + Send>;
/// Returns false once the subscriber's receiver is gone.
type Sink = Box<dyn Fn(&Payload) -> bool + Send>;

enum Command {
    Launch {
        reply: Sender<Result<()>>,
    },
    Subscribe {
        id: SubscriberId,
        destination: String,
        parser: Parser,
        sink: Sink,
        reply: Sender<Result<()>>,
    },
    Unsubscribe {
        id: SubscriberId,
        destination: String,
    },
    Disconnect {
        reply: Sender<()>,
    },
}

/// State observable from outside the worker.
struct Shared {
    state: RwLock<ConnectionState>,
    abandoned: AtomicBool,
    watchers: Mutex<Vec<Sender<ConnectionState>>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            debug!(from = ?*state, to = ?next, "connection state");
            *state = next;
        }
        self.watchers.lock().retain(|w| w.send(next).is_ok());
    }
}

/// Handle to a reconnecting topic stream. Cheap to clone.
#[derive(Clone)]
pub struct TopicStream {
    commands: Sender<Command>,
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
}

impl TopicStream {
    /// Spawn the worker owning `transport`. Nothing connects until the first
    /// `launch` or `subscribe`.
    pub fn spawn<T: Transport>(transport: T, config: StreamConfig) -> Self {
        let (commands, command_rx) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Idle),
            abandoned: AtomicBool::new(false),
            watchers: Mutex::new(Vec::new()),
        });

        let worker = Worker {
            backoff: ReconnectBackoff::new(config.backoff_base(), config.reconnect_ceiling()),
            config,
            transport,
            shared: Arc::clone(&shared),
            registry: HashMap::new(),
            announced: HashSet::new(),
            inbound_tx,
            generation: 0,
            timer: Timer::Idle,
            reconnecting: false,
        };
        let spawned = thread::Builder::new()
            .name("rowsync-topic-stream".into())
            .spawn(move || worker.run(command_rx, inbound_rx));
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn topic stream worker");
        }

        Self {
            commands,
            shared,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start the connection without subscribing to anything. A refused
    /// connect is returned as `SyncError::Transport`.
    pub fn launch(&self) -> Result<()> {
        let (reply, response) = bounded(1);
        self.request(Command::Launch { reply }, response)?
    }

    /// Subscribe to `topic`.
    ///
    /// Starts the connection if needed. The first subscriber of a destination
    /// causes a `SUBSCRIBE`; the returned subscription sends `UNSUBSCRIBE`
    /// when the last subscriber of that destination closes. Transport
    /// failures after this returns are handled by reconnecting and never
    /// reach the subscriber.
    pub fn subscribe<T: TopicSpec>(&self, topic: T) -> Result<TopicSubscription<T::Output>> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let destination = topic.destination().to_string();
        let (tx, receiver) = unbounded::<T::Output>();

        let parser: Parser = Box::new(move |fields: &[&str]| {
            topic.parse(fields).map(|v| Arc::new(v) as Payload)
        });
        let sink: Sink = Box::new(move |payload: &Payload| {
            match payload.downcast_ref::<T::Output>() {
                Some(value) => tx.send(value.clone()).is_ok(),
                // Destination registered with another output type.
                None => true,
            }
        });

        let (reply, response) = bounded(1);
        self.request(
            Command::Subscribe {
                id,
                destination: destination.clone(),
                parser,
                sink,
                reply,
            },
            response,
        )??;

        Ok(TopicSubscription {
            id,
            destination,
            receiver,
            commands: self.commands.clone(),
        })
    }

    /// Force the connection down and reset reconnect counters. Idempotent.
    /// Registered subscriptions are kept and re-announced on the next start.
    pub fn disconnect(&self) -> Result<()> {
        let (reply, response) = bounded(1);
        self.request(Command::Disconnect { reply }, response)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// True once a reconnect episode hit its ceiling and retrying stopped.
    /// Subscribers receive no signal for this; it is only observable here.
    pub fn reconnect_abandoned(&self) -> bool {
        self.shared.abandoned.load(Ordering::SeqCst)
    }

    /// Receive every subsequent state transition.
    pub fn state_changes(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = unbounded();
        self.shared.watchers.lock().push(tx);
        rx
    }

    /// Block until the connection reaches `state` or `timeout` passes.
    pub fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let changes = self.state_changes();
        if self.state() == state {
            return true;
        }
        let deadline = Instant::now() + timeout;
        while let Ok(next) = changes.recv_deadline(deadline) {
            if next == state {
                return true;
            }
        }
        self.state() == state
    }

    fn request<R>(&self, command: Command, response: Receiver<R>) -> Result<R> {
        self.commands.send(command).map_err(|_| SyncError::WorkerGone)?;
        response.recv().map_err(|_| SyncError::WorkerGone)
    }
}

/// One subscriber's view of a topic. Closing or dropping it deregisters.
pub struct TopicSubscription<T> {
    id: SubscriberId,
    destination: String,
    receiver: Receiver<T>,
    commands: Sender<Command>,
}

impl<T> TopicSubscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Receive the next message (blocking).
    pub fn recv(&self) -> std::result::Result<T, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<T, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<T, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Underlying channel, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    /// Deregister now.
    pub fn close(self) {}
}

impl<T> Drop for TopicSubscription<T> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: self.id,
            destination: std::mem::take(&mut self.destination),
        });
    }
}

struct Entry {
    parser: Parser,
    sinks: BTreeMap<SubscriberId, Sink>,
}

#[derive(Clone, Copy, Debug)]
enum Timer {
    Idle,
    /// Pause after a failure before the reconnect loop starts.
    Grace(Instant),
    /// Next reconnect attempt.
    Retry(Instant),
    /// Waiting for `CONNECTED`.
    Handshake(Instant),
}

impl Timer {
    fn deadline(&self) -> Option<Instant> {
        match *self {
            Timer::Idle => None,
            Timer::Grace(at) | Timer::Retry(at) | Timer::Handshake(at) => Some(at),
        }
    }
}

struct Worker<T> {
    transport: T,
    config: StreamConfig,
    shared: Arc<Shared>,
    registry: HashMap<String, Entry>,
    /// Destinations already sent `SUBSCRIBE` on the current connection.
    announced: HashSet<String>,
    inbound_tx: Sender<Inbound>,
    /// Bumped per connection; older inbound events are stale.
    generation: u64,
    backoff: ReconnectBackoff,
    timer: Timer,
    reconnecting: bool,
}

impl<T: Transport> Worker<T> {
    fn run(mut self, commands: Receiver<Command>, inbound: Receiver<Inbound>) {
        loop {
            let tick = match self.timer.deadline() {
                Some(at) => after(at.saturating_duration_since(Instant::now())),
                None => never(),
            };

            select! {
                recv(commands) -> command => match command {
                    Ok(command) => self.handle_command(command),
                    Err(_) => break,
                },
                recv(inbound) -> event => {
                    if let Ok(event) = event {
                        self.handle_inbound(event);
                    }
                },
                recv(tick) -> _ => self.handle_timer(),
            }
        }
        self.transport.close();
        debug!("topic stream worker stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Launch { reply } => {
                let _ = reply.send(self.start_session().map_err(SyncError::from));
            }
            Command::Subscribe {
                id,
                destination,
                parser,
                sink,
                reply,
            } => {
                if let Err(e) = self.start_session() {
                    let _ = reply.send(Err(SyncError::SubscriptionInitiation(e.to_string())));
                    return;
                }
                let entry = self.registry.entry(destination.clone()).or_insert_with(|| Entry {
                    parser,
                    sinks: BTreeMap::new(),
                });
                entry.sinks.insert(id, sink);
                debug!(%destination, subscriber = id.0, "subscriber added");
                self.announce(&destination);
                let _ = reply.send(Ok(()));
            }
            Command::Unsubscribe { id, destination } => self.remove_subscriber(id, &destination),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
        }
    }

    /// Connect unless a connection is already starting or up.
    fn start_session(&mut self) -> std::result::Result<(), TransportError> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }

        self.generation += 1;
        self.announced.clear();
        self.shared.abandoned.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let sink = InboundSink::new(self.generation, self.inbound_tx.clone());
        let connect = OutboundFrame::Connect.to_string();
        let opened = self
            .transport
            .connect(sink)
            .and_then(|()| self.transport.send(&connect));

        match opened {
            Ok(()) => {
                info!(generation = self.generation, "connecting");
                self.timer = Timer::Handshake(Instant::now() + self.config.handshake_timeout());
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.transport.close();
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Send `SUBSCRIBE` for `destination` if the live connection hasn't seen it.
    fn announce(&mut self, destination: &str) {
        if self.state() == ConnectionState::Disconnected || self.announced.contains(destination) {
            return;
        }
        let frame = OutboundFrame::Subscribe(destination.to_string()).to_string();
        match self.transport.send(&frame) {
            Ok(()) => {
                info!(%destination, "subscribed");
                self.announced.insert(destination.to_string());
            }
            Err(e) => self.handle_failure(&e.to_string()),
        }
    }

    fn remove_subscriber(&mut self, id: SubscriberId, destination: &str) {
        let Some(entry) = self.registry.get_mut(destination) else {
            return;
        };
        if entry.sinks.remove(&id).is_none() {
            return;
        }
        debug!(%destination, subscriber = id.0, "subscriber removed");
        if !entry.sinks.is_empty() {
            return;
        }

        self.registry.remove(destination);
        if self.announced.remove(destination) {
            let frame = OutboundFrame::Unsubscribe(destination.to_string()).to_string();
            match self.transport.send(&frame) {
                Ok(()) => info!(%destination, "unsubscribed"),
                Err(e) => self.handle_failure(&e.to_string()),
            }
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        if inbound.generation != self.generation {
            trace!(stale = inbound.generation, "dropping event from old connection");
            return;
        }
        match inbound.event {
            InboundEvent::Frame(text) => self.handle_frame(&text),
            InboundEvent::Failed(reason) => self.handle_failure(&reason),
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match parse_frame(text) {
            Some(InboundFrame::Connected) => self.handle_connected(),
            Some(InboundFrame::Message { destination, fields }) => {
                let Some(entry) = self.registry.get_mut(destination) else {
                    trace!(%destination, "message for unregistered destination");
                    return;
                };
                let Some(payload) = (entry.parser)(fields.as_slice()) else {
                    trace!(%destination, "unparsable message");
                    return;
                };
                let gone: Vec<SubscriberId> = entry
                    .sinks
                    .iter()
                    .filter(|(_, sink)| !sink(&payload))
                    .map(|(id, _)| *id)
                    .collect();
                let destination = destination.to_string();
                for id in gone {
                    self.remove_subscriber(id, &destination);
                }
            }
            None => trace!(frame = %text, "ignoring unrecognized frame"),
        }
    }

    fn handle_connected(&mut self) {
        if self.state() != ConnectionState::Connecting {
            return;
        }
        info!("connected");
        self.shared.set_state(ConnectionState::Connected);
        self.backoff.reset();
        self.reconnecting = false;
        self.timer = Timer::Idle;

        let mut pending: Vec<String> = self.registry.keys().cloned().collect();
        pending.sort();
        for destination in pending {
            if self.state() != ConnectionState::Connected {
                break;
            }
            self.announce(&destination);
        }
    }

    /// Tear down after a transport failure and schedule the reconnect loop.
    ///
    /// A failure before `CONNECTED` on a reconnect attempt counts as a failed
    /// attempt of the running episode rather than starting a new one.
    fn handle_failure(&mut self, reason: &str) {
        warn!(%reason, "transport failure");
        if self.reconnecting && self.state() == ConnectionState::Connecting {
            self.transport.close();
            self.generation += 1;
            self.announced.clear();
            self.shared.set_state(ConnectionState::Disconnected);
            self.timer = Timer::Idle;
            self.backoff.record_failure();
            self.schedule_retry();
            return;
        }
        self.disconnect();
        self.reconnecting = true;
        self.timer = Timer::Grace(Instant::now() + self.config.failure_grace());
    }

    fn disconnect(&mut self) {
        self.transport.close();
        self.generation += 1;
        self.announced.clear();
        self.backoff.reset();
        self.reconnecting = false;
        self.timer = Timer::Idle;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    fn handle_timer(&mut self) {
        let timer = self.timer;
        match timer.deadline() {
            Some(at) if Instant::now() >= at => {}
            _ => return,
        }
        self.timer = Timer::Idle;

        match timer {
            Timer::Idle => {}
            Timer::Grace(_) => self.schedule_retry(),
            Timer::Retry(_) => self.retry(),
            Timer::Handshake(_) => self.handle_failure("handshake timed out"),
        }
    }

    fn schedule_retry(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                debug!(attempt = self.backoff.attempt(), ?delay, "reconnect scheduled");
                self.timer = Timer::Retry(Instant::now() + delay);
            }
            None => {
                warn!(
                    spent = ?self.backoff.accumulated(),
                    "reconnect ceiling reached, giving up"
                );
                self.reconnecting = false;
                self.shared.abandoned.store(true, Ordering::SeqCst);
            }
        }
    }

    fn retry(&mut self) {
        if self.state() == ConnectionState::Connected {
            self.backoff.reset();
            self.reconnecting = false;
            return;
        }
        info!(attempt = self.backoff.attempt(), "reconnecting");
        if self.start_session().is_err() {
            self.backoff.record_failure();
            self.schedule_retry();
        }
    }
}
