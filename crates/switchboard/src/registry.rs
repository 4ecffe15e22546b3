//! Pending-reply correlation.
//!
//! Maps an OSC address to the requests waiting for a reply on it. The receive
//! loop resolves entries as datagrams arrive; command handlers register before
//! sending and await with a deadline.
//!
//! ## Invariants
//!
//! - A reply resolves at most one waiter, and each waiter is resolved at most once.
//! - Every registration is removed by exactly one of: resolve, supersede, or
//!   its [`Waiter`] being dropped (timeout, send failure, cancelled task).
//! - The lock is never held across an await point.
//!
//! With [`WaiterPolicy::Fifo`] several requests for one address queue up and
//! replies go to the oldest live waiter. With [`WaiterPolicy::Replace`] a new
//! registration evicts the previous one, which fails with
//! [`CorrelationError::Superseded`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use switchconf::WaiterPolicy;
use switchproto::OscArg;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("Timeout waiting for response to {address}")]
    Timeout { address: String, after: Duration },
    #[error("Request for {address} was superseded by a newer one")]
    Superseded { address: String },
}

/// What happened to an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiter holding this ticket.
    Delivered { ticket: u64 },
    /// Nobody was waiting on the address.
    Unsolicited,
}

struct Slot {
    ticket: u64,
    tx: oneshot::Sender<Vec<OscArg>>,
}

struct Inner {
    slots: Mutex<HashMap<String, VecDeque<Slot>>>,
    next_ticket: AtomicU64,
    policy: WaiterPolicy,
}

/// Shared handle to the pending-reply table. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("policy", &self.inner.policy)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Registry {
    pub fn new(policy: WaiterPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> WaiterPolicy {
        self.inner.policy
    }

    /// Register interest in the next reply on `address`.
    ///
    /// Call this before sending, so a fast reply cannot slip past.
    pub fn register(&self, address: &str) -> Waiter {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let evicted = {
            let mut slots = self.lock();
            let queue = slots.entry(address.to_string()).or_default();
            let evicted: Vec<Slot> = match self.inner.policy {
                WaiterPolicy::Replace => queue.drain(..).collect(),
                WaiterPolicy::Fifo => Vec::new(),
            };
            queue.push_back(Slot { ticket, tx });
            evicted
        };

        // Dropping the sender wakes the old waiter with Superseded
        for slot in evicted {
            warn!(address, ticket = slot.ticket, "Superseding pending request");
        }

        debug!(address, ticket, "Registered waiter");

        Waiter {
            registry: self.clone(),
            address: address.to_string(),
            ticket,
            registered: Instant::now(),
            rx,
        }
    }

    /// Deliver a reply to the oldest live waiter on `address`.
    pub fn resolve(&self, address: &str, args: Vec<OscArg>) -> Resolution {
        let mut slots = self.lock();
        let Some(queue) = slots.get_mut(address) else {
            return Resolution::Unsolicited;
        };

        let mut payload = args;
        let mut resolution = Resolution::Unsolicited;
        while let Some(slot) = queue.pop_front() {
            match slot.tx.send(payload) {
                Ok(()) => {
                    resolution = Resolution::Delivered {
                        ticket: slot.ticket,
                    };
                    break;
                }
                // Receiver already gone; try the next one
                Err(returned) => payload = returned,
            }
        }

        if queue.is_empty() {
            slots.remove(address);
        }

        resolution
    }

    /// Wait for the waiter's reply, giving up `timeout` after it registered.
    ///
    /// On timeout the registration is withdrawn under the lock. If a reply
    /// raced in between the deadline and the withdrawal, that reply wins.
    pub async fn await_with_timeout(
        &self,
        mut waiter: Waiter,
        timeout: Duration,
    ) -> Result<Vec<OscArg>, CorrelationError> {
        let deadline = waiter.registered + timeout;
        match tokio::time::timeout_at(deadline, &mut waiter.rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(CorrelationError::Superseded {
                address: waiter.address.clone(),
            }),
            Err(_) => {
                if self.forget(&waiter.address, waiter.ticket) {
                    return Err(CorrelationError::Timeout {
                        address: waiter.address.clone(),
                        after: timeout,
                    });
                }
                match waiter.rx.try_recv() {
                    Ok(args) => Ok(args),
                    Err(oneshot::error::TryRecvError::Closed) => Err(CorrelationError::Superseded {
                        address: waiter.address.clone(),
                    }),
                    Err(oneshot::error::TryRecvError::Empty) => Err(CorrelationError::Timeout {
                        address: waiter.address.clone(),
                        after: timeout,
                    }),
                }
            }
        }
    }

    /// Requests currently waiting across all addresses.
    pub fn pending_count(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_pending(&self, address: &str) -> bool {
        self.lock().get(address).is_some_and(|q| !q.is_empty())
    }

    /// Remove one registration. Returns false if it was already resolved or
    /// superseded.
    fn forget(&self, address: &str, ticket: u64) -> bool {
        let mut slots = self.lock();
        let Some(queue) = slots.get_mut(address) else {
            return false;
        };
        let found = match queue.iter().position(|slot| slot.ticket == ticket) {
            Some(index) => queue.remove(index).is_some(),
            None => false,
        };
        if queue.is_empty() {
            slots.remove(address);
        }
        found
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Slot>>> {
        // No invariant spans a panic inside the critical sections
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One registration. Withdraws itself from the registry when dropped.
pub struct Waiter {
    registry: Registry,
    address: String,
    ticket: u64,
    registered: Instant,
    rx: oneshot::Receiver<Vec<OscArg>>,
}

impl Waiter {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("address", &self.address)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.registry.forget(&self.address, self.ticket) {
            debug!(address = %self.address, ticket = self.ticket, "Withdrew abandoned waiter");
        }
    }
}
