use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::engine::response::Response;
use crate::shutdown::Shutdown;

/// Handle to one connection's bounded outbound mailbox.
///
/// Everything a table actor sends — replies and pub/sub events alike —
/// goes through one of these. The send never blocks: a full mailbox means
/// the client is too slow to keep up, and rather than buffer without bound
/// or stall the table actor, the connection's own cancellation signal is
/// raised. Other connections and all table actors are unaffected.
#[derive(Clone)]
pub struct ResponseSender {
    pub connection_id: u64,
    tx: mpsc::Sender<Response>,
    cancel: Shutdown,
}

impl ResponseSender {
    pub fn new(connection_id: u64, tx: mpsc::Sender<Response>, cancel: Shutdown) -> Self {
        Self {
            connection_id,
            tx,
            cancel,
        }
    }

    /// Queues a response for the connection writer. Returns false if the
    /// connection is gone or has just been condemned for falling behind.
    pub fn send(&self, res: Response) -> bool {
        match self.tx.try_send(res) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection = self.connection_id,
                    "response mailbox full, dropping connection"
                );
                self.cancel.quit();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// One live subscription: a globally unique id, the owning connection's
/// mailbox, and an active flag flipped by unsubscribe. Groups drop
/// deactivated subscriptions lazily the next time they are visited.
pub struct Subscription {
    pub id: u64,
    pub connection_id: u64,
    sender: ResponseSender,
    active: AtomicBool,
}

impl Subscription {
    pub fn new(id: u64, sender: ResponseSender) -> Arc<Self> {
        Arc::new(Self {
            id,
            connection_id: sender.connection_id,
            sender,
            active: AtomicBool::new(true),
        })
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn send(&self, res: Response) -> bool {
        self.sender.send(res)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("active", &self.active())
            .finish()
    }
}

/// An unordered set of subscriptions sharing one scope: a whole table, one
/// indexed value, or one record.
#[derive(Debug, Default)]
pub struct PubSub {
    subs: Vec<Arc<Subscription>>,
}

impl PubSub {
    pub fn add(&mut self, sub: Arc<Subscription>) {
        self.subs.push(sub);
    }

    /// Calls `visitor` for every active subscription. A subscription that
    /// is inactive, or whose visitor reports a failed send, is removed.
    pub fn visit(&mut self, mut visitor: impl FnMut(&Subscription) -> bool) {
        self.subs.retain(|sub| sub.active() && visitor(sub));
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.subs.is_empty()
    }

    pub fn count(&mut self) -> usize {
        let mut n = 0;
        self.visit(|_| {
            n += 1;
            true
        });
        n
    }
}

/// Per-table registry of subscriptions keyed by owning connection, used by
/// unsubscribe to find them without knowing which group they live in.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_connection: HashMap<u64, HashMap<u64, Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn add(&mut self, sub: Arc<Subscription>) {
        self.by_connection
            .entry(sub.connection_id)
            .or_default()
            .insert(sub.id, sub);
    }

    /// Deactivates one subscription by id. Returns true if it existed.
    pub fn deactivate(&mut self, connection_id: u64, pubsubid: u64) -> bool {
        let Some(subs) = self.by_connection.get_mut(&connection_id) else {
            return false;
        };
        match subs.remove(&pubsubid) {
            Some(sub) => {
                sub.deactivate();
                true
            }
            None => false,
        }
    }

    /// Deactivates every subscription owned by a connection, returning how
    /// many there were.
    pub fn deactivate_all(&mut self, connection_id: u64) -> usize {
        let Some(subs) = self.by_connection.remove(&connection_id) else {
            return 0;
        };
        for sub in subs.values() {
            sub.deactivate();
        }
        subs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::response::Response;

    fn sender(capacity: usize) -> (ResponseSender, mpsc::Receiver<Response>, Shutdown) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = Shutdown::new();
        (ResponseSender::new(7, tx, cancel.clone()), rx, cancel)
    }

    #[test]
    fn full_mailbox_condemns_the_connection() {
        let (sender, _rx, cancel) = sender(1);
        assert!(sender.send(Response::ok(0, "key")));
        assert!(!sender.send(Response::ok(0, "key")));
        assert!(cancel.is_done());
    }

    #[test]
    fn closed_mailbox_reports_failure_without_cancel() {
        let (sender, rx, cancel) = sender(1);
        drop(rx);
        assert!(!sender.send(Response::ok(0, "key")));
        assert!(!cancel.is_done());
    }

    #[test]
    fn visit_prunes_inactive_subscriptions() {
        let (sender, _rx, _cancel) = sender(16);
        let mut group = PubSub::default();
        let a = Subscription::new(1, sender.clone());
        let b = Subscription::new(2, sender.clone());
        group.add(a.clone());
        group.add(b.clone());
        assert_eq!(group.count(), 2);

        a.deactivate();
        let mut seen = Vec::new();
        group.visit(|sub| {
            seen.push(sub.id);
            true
        });
        assert_eq!(seen, vec![2]);
        assert_eq!(group.count(), 1);
    }

    #[test]
    fn registry_deactivates_by_id_and_by_connection() {
        let (sender, _rx, _cancel) = sender(16);
        let mut registry = SubscriptionRegistry::default();
        let a = Subscription::new(1, sender.clone());
        let b = Subscription::new(2, sender.clone());
        registry.add(a.clone());
        registry.add(b.clone());

        assert!(registry.deactivate(7, 1));
        assert!(!a.active());
        assert!(!registry.deactivate(7, 1));
        assert!(!registry.deactivate(9, 2));

        assert_eq!(registry.deactivate_all(7), 1);
        assert!(!b.active());
        assert_eq!(registry.deactivate_all(7), 0);
    }
}
