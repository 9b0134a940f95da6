//! Write-once shutdown broadcast.
//!
//! A [`ShutdownSignal`] records one [`ShutdownReason`] and delivers it to
//! every registered listener exactly once. Listeners registered after the
//! reason is recorded are invoked on the spot instead of being stored, so
//! registration order relative to the close never loses a notification.
//!
//! Listeners always run with no lock held. A listener may close other
//! sessions, register or remove listeners, or fire other signals.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::Notify;

use crate::reason::ShutdownReason;

type Listener = Box<dyn FnOnce(&ShutdownReason) + Send>;

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    table: BTreeMap<ListenerId, Listener>,
    delivering: bool,
    notified: bool,
}

#[derive(Default)]
pub struct ShutdownSignal {
    reason: OnceLock<ShutdownReason>,
    listeners: Mutex<Listeners>,
    waiters: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` if none is recorded yet. Returns whether this call set it.
    pub fn set(&self, reason: ShutdownReason) -> bool {
        self.reason.set(reason).is_ok()
    }

    /// The recorded reason, if any.
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    pub fn is_set(&self) -> bool {
        self.reason.get().is_some()
    }

    /// True once [`notify`](Self::notify) has finished running every listener.
    pub fn is_notified(&self) -> bool {
        self.lock().notified
    }

    /// Deliver the recorded reason to every registered listener, in
    /// registration order, and wake async waiters.
    ///
    /// The signal reports [`is_notified`](Self::is_notified) only after the
    /// last listener returns. A call made while another delivery is in
    /// progress returns without waiting for it.
    ///
    /// # Panics
    ///
    /// Panics if no reason has been recorded. Broadcasting an undefined
    /// reason is a bug in the caller.
    pub fn notify(&self) {
        let Some(reason) = self.reason.get() else {
            panic!("shutdown notification requested before a reason was recorded");
        };

        let drained = {
            let mut listeners = self.lock();
            if listeners.delivering || listeners.notified {
                return;
            }
            listeners.delivering = true;
            std::mem::take(&mut listeners.table)
        };

        for (_, listener) in drained {
            listener(reason);
        }

        {
            let mut listeners = self.lock();
            listeners.delivering = false;
            listeners.notified = true;
        }
        self.waiters.notify_waiters();
    }

    /// [`set`](Self::set) then [`notify`](Self::notify). Returns whether this
    /// call recorded the reason.
    pub fn fire(&self, reason: ShutdownReason) -> bool {
        let first = self.set(reason);
        self.notify();
        first
    }

    /// Register a listener.
    ///
    /// Returns `None` when a reason is already recorded: the listener has
    /// then been invoked immediately and is not stored.
    pub fn add_listener<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce(&ShutdownReason) + Send + 'static,
    {
        let mut listeners = self.lock();
        if let Some(reason) = self.reason.get() {
            drop(listeners);
            listener(reason);
            return None;
        }

        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.table.insert(id, Box::new(listener));
        Some(id)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.lock().table.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().table.len()
    }

    /// Wait until the signal has been delivered, then return the reason.
    pub async fn wait(&self) -> ShutdownReason {
        loop {
            let mut notified = pin!(self.waiters.notified());
            notified.as_mut().enable();

            if self.is_notified() {
                if let Some(reason) = self.reason.get() {
                    return reason.clone();
                }
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("reason", &self.reason.get())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
