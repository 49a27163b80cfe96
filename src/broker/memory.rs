use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;

use super::{Broker, BrokerMessage, MessageStream};
use crate::error::Error;

struct Subscriber {
    topic: String,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

/// In-process broker. Delivers to subscribers of the published channel only.
pub struct MemoryBroker {
    subscribers: Mutex<Vec<Subscriber>>,
    healthy: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Makes health checks fail (or succeed again).
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    /// Returns the number of subscribers the message was delivered to.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // drop subscribers whose stream is gone
        subscribers.retain(|s| !s.sender.is_closed());

        let message = BrokerMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        subscribers
            .iter()
            .filter(|s| s.topic == channel)
            .filter(|s| s.sender.send(message.clone()).is_ok())
            .count()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|s| !s.sender.is_closed())
            .count()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn health_check(&self) -> Result<(), Error> {
        if self.healthy.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::BrokerUnavailable(
                "memory broker marked unhealthy".to_string(),
            ))
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, Error> {
        if !self.healthy.load(Ordering::Acquire) {
            return Err(Error::BrokerUnavailable(
                "memory broker marked unhealthy".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Subscriber {
                topic: topic.to_string(),
                sender,
            });

        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|msg| (Ok(msg), receiver))
        });
        Ok(stream.boxed())
    }
}
