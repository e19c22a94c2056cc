//! Per-key trailing-edge throttle.
//!
//! Values submitted for a key while its window is open replace each other;
//! only the latest is emitted, once, when the window closes. The window is
//! never extended by later submissions. Keys are fully independent.
//!
//! [`PerKeyThrottle`] is the clock-driven core (callers pass `now`), which
//! keeps it deterministic under test. [`ThrottleRunner`] drives the core
//! from a timer thread and emits on a channel.

use crossbeam_channel::{after, never, select, unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::hash::Hash;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct Pending<V> {
    due: Instant,
    /// Window start order, to break ties between equal deadlines.
    seq: u64,
    value: V,
}

/// Clock-driven per-key throttle state.
pub struct PerKeyThrottle<K, V> {
    window: Duration,
    pending: HashMap<K, Pending<V>>,
    next_seq: u64,
}

impl<K, V> PerKeyThrottle<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Hold `value` for `key`. Returns true if this opened a new window.
    pub fn submit(&mut self, key: K, value: V, now: Instant) -> bool {
        if let Some(pending) = self.pending.get_mut(&key) {
            pending.value = value;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(
            key,
            Pending {
                due: now + self.window,
                seq,
                value,
            },
        );
        true
    }

    /// Earliest deadline among open windows.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    /// Close every window due at `now`, in the order the windows opened.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let due_keys: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut fired: Vec<(u64, K, V)> = due_keys
            .into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (p.seq, k, p.value)))
            .collect();
        fired.sort_by_key(|(seq, _, _)| *seq);
        fired.into_iter().map(|(_, k, v)| (k, v)).collect()
    }

    /// Drop the open window for `key` without emitting. Other keys are untouched.
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.pending.remove(key).map(|p| p.value)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

enum Command<K, V> {
    Submit(K, V),
    Cancel(K),
    Shutdown,
}

/// Runs a [`PerKeyThrottle`] on its own timer thread.
///
/// Surviving `(key, value)` pairs are sent to the output channel. Dropping
/// the runner discards any open windows.
pub struct ThrottleRunner<K, V> {
    input: Sender<Command<K, V>>,
    handle: Option<JoinHandle<()>>,
}

impl<K, V> ThrottleRunner<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Spawn a runner emitting into `output`.
    pub fn spawn(window: Duration, output: Sender<(K, V)>) -> Self {
        let (input, commands) = unbounded();
        let handle = thread::Builder::new()
            .name("rowsync-throttle".into())
            .spawn(move || run(PerKeyThrottle::new(window), commands, output))
            .ok();
        Self { input, handle }
    }

    /// Spawn a runner with a fresh output channel.
    pub fn with_channel(window: Duration) -> (Self, Receiver<(K, V)>) {
        let (tx, rx) = unbounded();
        (Self::spawn(window, tx), rx)
    }

    pub fn submit(&self, key: K, value: V) {
        let _ = self.input.send(Command::Submit(key, value));
    }

    pub fn cancel(&self, key: K) {
        let _ = self.input.send(Command::Cancel(key));
    }
}

impl<K, V> Drop for ThrottleRunner<K, V> {
    fn drop(&mut self) {
        let _ = self.input.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<K, V>(
    mut throttle: PerKeyThrottle<K, V>,
    commands: Receiver<Command<K, V>>,
    output: Sender<(K, V)>,
) where
    K: Eq + Hash + Clone,
{
    loop {
        let timer = match throttle.next_deadline() {
            Some(due) => after(due.saturating_duration_since(Instant::now())),
            None => never(),
        };

        select! {
            recv(commands) -> msg => match msg {
                Ok(Command::Submit(key, value)) => {
                    if throttle.submit(key, value, Instant::now()) {
                        trace!("throttle window opened");
                    }
                }
                Ok(Command::Cancel(key)) => {
                    throttle.cancel(&key);
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(timer) -> _ => {}
        }

        for item in throttle.take_due(Instant::now()) {
            if output.send(item).is_err() {
                debug!("throttle output closed");
                return;
            }
        }
    }
    debug!(discarded = throttle.pending_count(), "throttle stopped");
}
