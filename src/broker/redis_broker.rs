use async_trait::async_trait;
use futures::StreamExt;
use log::debug;

use super::{Broker, BrokerMessage, MessageStream};
use crate::config::BrokerOptions;
use crate::error::Error;

/// Redis PUBLISH/SUBSCRIBE.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    /// Parses the URL only; no connection is made until used.
    ///
    /// # Errors
    ///
    /// [`Error::Redis`] if the URL is invalid.
    pub fn new(options: &BrokerOptions) -> Result<Self, Error> {
        let client = redis::Client::open(options.url.as_str())?;
        Ok(Self { client })
    }

    /// Publishes `payload` on `channel`, returning the number of receivers.
    ///
    /// # Errors
    ///
    /// [`Error::Redis`] if the connection or the command fails.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize, Error> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn health_check(&self) -> Result<(), Error> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::BrokerUnavailable(format!(
                "unexpected PING reply {reply:?}"
            )))
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, Error> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        debug!("Subscribed to redis channel {topic}");

        let stream = pubsub.into_on_message().map(|msg| -> Result<BrokerMessage, Error> {
            let payload: String = msg.get_payload()?;
            Ok(BrokerMessage {
                channel: msg.get_channel_name().to_string(),
                payload,
            })
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn options(url: &str) -> BrokerOptions {
        BrokerOptions {
            url: url.to_string(),
            ..BrokerOptions::default()
        }
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(matches!(
            RedisBroker::new(&options("not-a-redis-url")),
            Err(Error::Redis(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_fails_without_server() {
        // nothing listens on port 1
        let broker = RedisBroker::new(&options("redis://127.0.0.1:1")).unwrap();
        assert!(matches!(
            broker.health_check().await,
            Err(Error::BrokerUnavailable(_))
        ));
    }

    #[ignore = "This test requires a running Redis server at REDIS_URL"]
    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let url = dotenvy::var("REDIS_URL").expect("REDIS_URL not set");
        let broker = RedisBroker::new(&options(&url)).unwrap();
        broker.health_check().await.unwrap();

        let mut stream = broker.subscribe("sophie-test").await.unwrap();
        broker.publish("sophie-test", "status:online").await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no message received")
            .expect("stream ended")
            .unwrap();
        assert_eq!(msg.channel, "sophie-test");
        assert_eq!(msg.payload, "status:online");
    }
}
