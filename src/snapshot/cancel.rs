//! Cooperative cancellation for fetches and snapshot sequences.

use crate::error::FetchError;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag that also wakes blocked waiters.
///
/// Cancelling drops the only sender of an internal channel, so every clone
/// of [`CancelToken::signal`] becomes ready at once. Cancellation propagates
/// to tokens made with [`CancelToken::child`], never the other way.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
    children: Arc<Mutex<Vec<CancelToken>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(trigger))),
            signal,
            children: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cancel this token and every child. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.trigger.lock().take();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            child.cancel();
        }
    }

    /// A token cancelled with this one that can also be cancelled alone.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut children = self.children.lock();
        children.retain(|c| !c.is_cancelled());
        if self.is_cancelled() {
            child.cancel();
        } else {
            children.push(child.clone());
        }
        child
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), FetchError> {
        if self.is_cancelled() {
            Err(FetchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Channel that becomes ready (disconnected) on cancel, for `select!`.
    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }

    /// Sleep for `duration`, waking early with `Err(Cancelled)` on cancel.
    pub fn sleep(&self, duration: Duration) -> Result<(), FetchError> {
        self.check()?;
        select! {
            recv(self.signal) -> _ => Err(FetchError::Cancelled),
            default(duration) => self.check(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
