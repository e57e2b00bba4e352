//! Fan-out of tool snapshots to registered subscribers.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::tool::ToolSnapshot;

/// Receiver of tool snapshots.
///
/// Errors and panics raised here are logged by the broker and do not affect
/// delivery to other subscribers.
pub trait ToolSubscriber: Send + Sync {
    /// Called once per published snapshot.
    ///
    /// # Errors
    ///
    /// Any error is logged and otherwise ignored.
    fn on_tools_changed(&self, snapshot: &Arc<ToolSnapshot>) -> anyhow::Result<()>;

    /// A closed subscriber is pruned on the next publish.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> ToolSubscriber for F
where
    F: Fn(&ToolSnapshot) -> anyhow::Result<()> + Send + Sync,
{
    fn on_tools_changed(&self, snapshot: &Arc<ToolSnapshot>) -> anyhow::Result<()> {
        self(snapshot.as_ref())
    }
}

/// Forwards snapshots into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber(pub mpsc::UnboundedSender<Arc<ToolSnapshot>>);

impl ToolSubscriber for ChannelSubscriber {
    fn on_tools_changed(&self, snapshot: &Arc<ToolSnapshot>) -> anyhow::Result<()> {
        self.0
            .send(Arc::clone(snapshot))
            .map_err(|_| anyhow::anyhow!("tool snapshot receiver dropped"))
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Subscribers = Vec<(SubscriptionId, Arc<dyn ToolSubscriber>)>;

#[derive(Default)]
pub struct ToolBroker {
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
    latest: Mutex<HashMap<String, Arc<ToolSnapshot>>>,
}

impl std::fmt::Debug for ToolBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBroker")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ToolBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl ToolSubscriber + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(subscriber)));
        tracing::debug!(subscription = %id, "tool subscriber registered");
        id
    }

    /// Subscribe with a channel; the subscription ends when the receiver is dropped.
    pub fn subscribe_channel(
        &self,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Arc<ToolSnapshot>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.subscribe(ChannelSubscriber(tx)), rx)
    }

    /// Returns `false` if the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `snapshot` to every subscriber in registration order.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, snapshot: impl Into<Arc<ToolSnapshot>>) -> usize {
        let snapshot: Arc<ToolSnapshot> = snapshot.into();
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.server_id.clone(), Arc::clone(&snapshot));

        // Clone the list so subscribers may (un)subscribe from inside a callback.
        let subscribers: Subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, subscriber) in &subscribers {
            if subscriber.is_closed() {
                closed.push(*id);
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_tools_changed(&snapshot))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        subscription = %id,
                        server_id = %snapshot.server_id,
                        "tool subscriber failed: {e:#}"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        subscription = %id,
                        server_id = %snapshot.server_id,
                        "tool subscriber panicked"
                    );
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| !closed.contains(id));
        }

        tracing::debug!(
            server_id = %snapshot.server_id,
            generation = snapshot.generation,
            tools = snapshot.len(),
            delivered,
            "published tool snapshot"
        );
        delivered
    }

    /// Last snapshot published for `server_id`.
    #[must_use]
    pub fn latest(&self, server_id: &str) -> Option<Arc<ToolSnapshot>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .cloned()
    }

    pub fn forget(&self, server_id: &str) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server_id);
    }
}
