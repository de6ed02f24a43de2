//! Message lifecycle notifications.
//!
//! Each subscriber gets its own bounded channel. Publishing never blocks:
//! a full channel drops the event for that subscriber only.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use courier_shared::protocol::MessageType;
use courier_shared::{MessageId, PublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageEventKind {
    /// The message passed validation and is about to hit the network.
    Scheduled,
    /// Frames for the message were emitted.
    Sent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    pub kind: MessageEventKind,
    /// `None` for public and community sends.
    pub recipient: Option<PublicKey>,
    pub message_ids: Vec<MessageId>,
    pub local_chat_id: String,
    pub message_type: Option<MessageType>,
}

struct Subscribers {
    senders: Vec<mpsc::Sender<MessageEvent>>,
    stopped: bool,
}

pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Subscribers>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Subscribers {
                senders: Vec::new(),
                stopped: false,
            }),
        }
    }

    /// Register a new subscriber. After [`stop`](Self::stop) the returned
    /// receiver is already closed.
    pub fn subscribe(&self) -> mpsc::Receiver<MessageEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.lock();
        if !subs.stopped {
            subs.senders.push(tx);
        }
        rx
    }

    /// Offer `event` to every subscriber without waiting.
    pub fn publish(&self, event: MessageEvent) {
        let mut subs = self.lock();
        // Receivers that went away are forgotten on the way.
        subs.senders.retain(|tx| !tx.is_closed());

        for tx in &subs.senders {
            if tx.try_send(event.clone()).is_err() {
                tracing::warn!(
                    kind = ?event.kind,
                    "message events subscription channel full, dropping event"
                );
            }
        }
    }

    /// Close and forget all subscriber channels.
    pub fn stop(&self) {
        let mut subs = self.lock();
        subs.stopped = true;
        subs.senders.clear();
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.lock().senders.len()
    }

    // No invariant of the subscriber list spans a panic; poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
