//! Per-identity single-flight for derived variant generation
//!
//! The first caller for an identity generates; concurrent callers wait on the
//! same lock and re-check storage once they hold it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    waiters: usize,
}

#[derive(Default)]
pub struct Coalescer {
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for Coalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Held while generating one identity; released on drop
pub struct FlightGuard<'a> {
    // field order matters: unlock before the slot is released
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket<'a>,
}

struct Ticket<'a> {
    coalescer: &'a Coalescer,
    identity: String,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut slots = self.coalescer.slots();
        if let Some(slot) = slots.get_mut(&self.identity) {
            slot.waiters -= 1;
            if slot.waiters == 0 {
                slots.remove(&self.identity);
            }
        }
    }
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // the map stays consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive generation rights on `identity`
    ///
    /// Cancelling the returned future before it resolves releases the slot.
    pub async fn acquire(&self, identity: &str) -> FlightGuard<'_> {
        let lock = {
            let mut slots = self.slots();
            let slot = slots.entry(identity.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                waiters: 0,
            });
            slot.waiters += 1;
            if slot.waiters > 1 {
                debug!(identity = %identity, waiters = slot.waiters, "Request coalesced");
            }
            slot.lock.clone()
        };
        let ticket = Ticket {
            coalescer: self,
            identity: identity.to_string(),
        };
        let guard = lock.lock_owned().await;
        FlightGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Identities with at least one holder or waiter
    pub fn in_flight(&self) -> usize {
        self.slots().len()
    }
}
