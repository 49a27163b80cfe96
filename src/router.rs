use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::{select, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerMessage, MessageStream};
use crate::catalog::StatusCatalog;
use crate::error::Error;
use crate::event::Event;
use crate::notifier::Notifier;

/// Turns broker events into posted status messages.
pub struct EventRouter {
    catalog: Arc<StatusCatalog>,
    notifier: Arc<dyn Notifier>,
}

impl EventRouter {
    #[must_use]
    pub fn new(catalog: Arc<StatusCatalog>, notifier: Arc<dyn Notifier>) -> Self {
        Self { catalog, notifier }
    }

    /// Verifies the broker, subscribes to `topic` and spawns the listener.
    ///
    /// Returns once the subscription is established. The listener runs until
    /// `token` is cancelled or the broker ends the subscription; the latter
    /// is reported as an error from the returned handle.
    ///
    /// # Errors
    ///
    /// [`Error::BrokerUnavailable`] if the health check or the subscription
    /// fails. No subscription is attempted after a failed health check.
    pub async fn subscribe<B: Broker + ?Sized>(
        self,
        broker: &B,
        topic: &str,
        token: CancellationToken,
    ) -> Result<JoinHandle<Result<(), Error>>, Error> {
        broker.health_check().await.map_err(unavailable)?;

        let stream = broker.subscribe(topic).await.map_err(unavailable)?;
        let topic = topic.to_string();
        Ok(tokio::spawn(async move {
            self.listen(&topic, stream, token).await
        }))
    }

    /// Decodes one payload, picks a message and posts it.
    /// Returns the text that was posted.
    ///
    /// # Errors
    ///
    /// Decoding, catalog and notifier errors, unchanged.
    pub async fn dispatch(&self, payload: &str) -> Result<String, Error> {
        let event: Event = payload.parse()?;
        let message = self
            .catalog
            .pick(&event.service_type, &event.event_name)?
            .to_string();
        self.notifier.post_message(&message).await?;
        Ok(message)
    }

    async fn listen(
        &self,
        topic: &str,
        mut stream: MessageStream,
        token: CancellationToken,
    ) -> Result<(), Error> {
        info!("Waiting for events on {topic}");

        loop {
            select! {
                () = token.cancelled() => {
                    info!("Shutdown requested, stopping listener");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => self.handle(topic, message).await,
                    Some(Err(e)) => warn!("Could not read broker message: {e}"),
                    None => {
                        error!("Subscription to {topic} ended");
                        return Err(Error::BrokerUnavailable(format!(
                            "subscription to {topic} ended"
                        )));
                    }
                }
            }
        }

        info!("Event listener stopped gracefully");
        Ok(())
    }

    /// Never fails; every per-event problem is logged and the event dropped.
    async fn handle(&self, topic: &str, message: BrokerMessage) {
        if message.channel != topic {
            debug!("Ignoring message on channel {}", message.channel);
            return;
        }

        match self.dispatch(&message.payload).await {
            Ok(text) => info!("{}: posted {text:?}", message.payload.trim()),
            Err(
                e @ (Error::MalformedEvent(_)
                | Error::UnknownCategory { .. }
                | Error::EmptyCategory(_)),
            ) => warn!("Dropping event: {e}"),
            Err(e) => error!("Problem occurred while posting for {:?}: {e}", message.payload),
        }
    }
}

fn unavailable(e: Error) -> Error {
    match e {
        Error::BrokerUnavailable(_) => e,
        other => Error::BrokerUnavailable(other.to_string()),
    }
}
