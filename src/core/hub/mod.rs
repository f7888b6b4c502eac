//! Broadcast hub: fans price snapshots out to connected subscribers
//!
//! Subscribers come and go at any time, so the registry is a concurrent map
//! and every fan-out iterates a point-in-time copy of it. Delivery to one
//! subscriber never blocks delivery to the rest: each subscriber has its own
//! bounded queue and a full or closed queue just drops that subscriber.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::types::market::{Instrument, StockUpdate};

pub struct BroadcastHub {
    subscribers: DashMap<Uuid, mpsc::Sender<String>>,
    buffer: usize,
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Register a subscriber. The current snapshot is queued immediately so
    /// a client sees the full market state before the first tick arrives.
    pub fn subscribe(&self, snapshot: Vec<Instrument>) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        if let Ok(message) = Self::encode(snapshot) {
            // Queue is freshly created, so this cannot be full
            let _ = tx.try_send(message);
        }

        self.subscribers.insert(id, tx);
        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber connected");
        (id, rx)
    }

    /// Remove a subscriber on clean disconnect
    pub fn unsubscribe(&self, id: &Uuid) {
        if self.subscribers.remove(id).is_some() {
            debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber disconnected");
        }
    }

    /// Fan the snapshot out to every currently connected subscriber.
    /// Returns the number of subscribers that accepted the message.
    pub fn publish(&self, snapshot: Vec<Instrument>) -> usize {
        let message = match Self::encode(snapshot) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to encode price update, skipping broadcast");
                return 0;
            }
        };

        // Point-in-time copy: a connect or disconnect during fan-out cannot
        // corrupt the iteration
        let targets: Vec<(Uuid, mpsc::Sender<String>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Slow or gone; drop silently and keep going
                    self.subscribers.remove(&id);
                    debug!(subscriber = %id, "Dropped unresponsive subscriber");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn encode(snapshot: Vec<Instrument>) -> Result<String, serde_json::Error> {
        serde_json::to_string(&StockUpdate::new(snapshot))
    }
}
