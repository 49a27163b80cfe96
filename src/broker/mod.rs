//! Publish/subscribe transports the router listens on.

mod memory;
mod redis_broker;

pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Error;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// Per-message decode failures are yielded as `Err` items; the stream only
/// ends when the subscription is lost.
pub type MessageStream = BoxStream<'static, Result<BrokerMessage, Error>>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Round trip to the broker; must succeed before subscribing.
    async fn health_check(&self) -> Result<(), Error>;

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, Error>;
}
