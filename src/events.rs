//! Host-visible events and the observer list that delivers them.

use std::sync::{Arc, Mutex};

use coqpod_core::protocol::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::transport::DownloadProgress;

/// Event republished by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum PodEvent {
    /// A decoded kernel answer or a session notice.
    Message(Message),
    /// Download progress of a package or image fetch.
    Progress {
        uri: String,
        download: DownloadProgress,
    },
}

impl PodEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Progress { .. } => "progress",
        }
    }

    /// `{"event": name, "payload": ...}` as written by the stdio driver.
    pub fn to_value(&self) -> Value {
        let payload = match self {
            Self::Message(message) => message.to_value(),
            Self::Progress { uri, download } => json!({ "uri": uri, "download": download }),
        };
        json!({ "event": self.name(), "payload": payload })
    }
}

/// Observer list owned by one session.
///
/// Each subscriber gets every event published after it subscribed, in publish
/// order. Dropping the receiver unsubscribes it.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<PodEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> PodEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(tx);
        PodEvents { rx }
    }

    pub fn publish(&self, event: PodEvent) {
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .len()
    }

    /// Drop every subscriber; their streams end once drained.
    pub fn close(&self) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .clear();
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct PodEvents {
    rx: UnboundedReceiver<PodEvent>,
}

impl PodEvents {
    /// Next event, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<PodEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<PodEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Every event queued so far.
    pub fn drain(&mut self) -> Vec<PodEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Queued messages only, dropping progress events.
    pub fn drain_messages(&mut self) -> Vec<Message> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                PodEvent::Message(message) => Some(message),
                PodEvent::Progress { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use coqpod_core::protocol::Notice;

    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let mut kept = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        bus.publish(PodEvent::Message(Notice::LibLoaded("+init".into()).into()));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain().len(), 1);
    }
}
