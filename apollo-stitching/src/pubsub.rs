//! Local publish/subscribe fan-out for subscription roots.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use apollo_compiler::collections::IndexMap;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::json_ext::Value;

type Listeners = IndexMap<u64, mpsc::UnboundedSender<Value>>;

/// Delivers every published payload to every listener of its trigger, exactly once.
///
/// Listeners are unbounded: a slow subscriber never causes payloads to be dropped.
#[derive(Clone, Default)]
pub struct PubSub {
    triggers: Arc<DashMap<String, Listeners>>,
    next_id: Arc<AtomicU64>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener for `trigger`. Dropping the returned stream unregisters it.
    pub fn subscribe(&self, trigger: impl Into<String>) -> PubSubStream {
        let trigger = trigger.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.triggers
            .entry(trigger.clone())
            .or_default()
            .insert(id, sender);
        trace!(%trigger, id, "listener registered");
        PubSubStream {
            receiver: UnboundedReceiverStream::new(receiver),
            registration: Registration {
                triggers: self.triggers.clone(),
                trigger,
                id,
            },
        }
    }

    /// Sends `payload` to every live listener of `trigger`. Returns how many received it.
    pub fn publish(&self, trigger: &str, payload: Value) -> usize {
        let Some(mut listeners) = self.triggers.get_mut(trigger) else {
            return 0;
        };
        listeners.retain(|_, sender| sender.send(payload.clone()).is_ok());
        listeners.len()
    }

    /// The number of live listeners of `trigger`.
    pub fn listener_count(&self, trigger: &str) -> usize {
        self.triggers
            .get(trigger)
            .map(|listeners| listeners.len())
            .unwrap_or_default()
    }
}

struct Registration {
    triggers: Arc<DashMap<String, Listeners>>,
    trigger: String,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.triggers
            .remove_if_mut(&self.trigger, |_, listeners| {
                listeners.shift_remove(&self.id);
                listeners.is_empty()
            });
        trace!(trigger = %self.trigger, id = self.id, "listener unregistered");
    }
}

/// The payloads published to one trigger after the stream was created.
pub struct PubSubStream {
    receiver: UnboundedReceiverStream<Value>,
    registration: Registration,
}

impl PubSubStream {
    pub fn trigger(&self) -> &str {
        &self.registration.trigger
    }
}

impl Stream for PubSubStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
