use log::{error, info, warn};
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, RedisBroker};
use crate::catalog::{Category, StatusCatalog};
use crate::config::{Config, ProbeOptions};
use crate::error::Error;
use crate::notifier::{Notifier, TwitterNotifier};
use crate::probe::{IcmpPinger, Prober};
use crate::router::EventRouter;

/// Loads the catalog and credentials, connects to Redis and listens for
/// events until `token` is cancelled.
///
/// # Errors
///
/// Any configuration or broker connectivity problem at startup, in which case
/// nothing is subscribed. Losing the subscription later is
/// [`Error::BrokerUnavailable`].
pub async fn run(config: Config, token: CancellationToken) -> Result<(), Error> {
    let late_window = config.statuses.late_window()?;
    let catalog = StatusCatalog::load(&config.statuses.path)?.with_late_window(late_window);

    let mut notifier = TwitterNotifier::new(&config.twitter)?;
    notifier.configure(config.twitter.credentials()?)?;

    let broker = RedisBroker::new(&config.broker)?;

    run_with(&config, catalog, Arc::new(notifier), &broker, token).await
}

/// Same as [`run`] with the collaborators supplied by the caller.
///
/// # Errors
///
/// [`Error::BrokerUnavailable`] if the broker fails its health check, refuses
/// the subscription or ends it before `token` is cancelled.
pub async fn run_with<B: Broker + ?Sized>(
    config: &Config,
    catalog: StatusCatalog,
    notifier: Arc<dyn Notifier>,
    broker: &B,
    token: CancellationToken,
) -> Result<(), Error> {
    // Initial configuration logging
    info!("Starting hows-sophie...");
    info!("Broker: {}", config.broker.url);
    info!("Topic: {}", config.broker.topic);
    info!(
        "Loaded {} online, {} late and {} offline messages from {}",
        catalog.messages(Category::OnlineNormal).len(),
        catalog.messages(Category::OnlineLate).len(),
        catalog.messages(Category::Offline).len(),
        config.statuses.path.display()
    );
    match catalog.late_window() {
        Some(window) => info!("Late messages are used during {window}"),
        None => info!("No late window set, online events always use normal messages"),
    }

    if let Some(host) = &config.probe.host {
        probe_host(host, &config.probe, &token).await;
    }

    let listener = EventRouter::new(Arc::new(catalog), notifier)
        .subscribe(broker, &config.broker.topic, token.clone())
        .await?;
    info!("Waiting for messages, to exit press CTRL+C");

    match listener.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(e) => error!("Event listener failed: {e}"),
    }

    info!("hows-sophie stopped gracefully");
    Ok(())
}

async fn probe_host(host: &str, options: &ProbeOptions, token: &CancellationToken) {
    let prober = Prober::with_options(IcmpPinger::new(), options);

    select! {
        result = prober.is_online(host) => match result {
            Ok(rtt) => info!("{host}: UP (average round trip {rtt:?})"),
            Err(e) => warn!("{host}: DOWN ({e})"),
        },
        () = token.cancelled() => info!("Shutdown requested during startup probe"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, MessageStream};
    use crate::config::{BrokerOptions, StatusOptions, TwitterOptions};
    use crate::notifier::RecordingNotifier;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::{path::PathBuf, time::Duration};
    use tokio::time::timeout;

    fn config(statuses: PathBuf) -> Config {
        Config {
            broker: BrokerOptions::default(),
            statuses: StatusOptions {
                path: statuses,
                late_from_hour: None,
                late_until_hour: None,
            },
            twitter: TwitterOptions::default(),
            probe: ProbeOptions::default(),
        }
    }

    /// Passes the health check, then ends every subscription immediately.
    struct DroppingBroker;

    #[async_trait]
    impl Broker for DroppingBroker {
        async fn health_check(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn subscribe(&self, _topic: &str) -> Result<MessageStream, Error> {
            Ok(futures::stream::empty().boxed())
        }
    }

    fn catalog() -> StatusCatalog {
        StatusCatalog::new(
            vec!["A".to_string(), "B".to_string()],
            vec![],
            vec!["C".to_string()],
        )
    }

    async fn wait_for_subscriber(broker: &MemoryBroker) {
        timeout(Duration::from_secs(2), async {
            while broker.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("router never subscribed");
    }

    #[tokio::test]
    async fn test_run_with_routes_until_cancelled() {
        let broker = Arc::new(MemoryBroker::new());
        let (notifier, mut rx) = RecordingNotifier::new();
        let token = CancellationToken::new();

        let task = tokio::spawn({
            let broker = Arc::clone(&broker);
            let token = token.clone();
            async move {
                let config = config(PathBuf::from("statuses.toml"));
                run_with(&config, catalog(), notifier, &*broker, token).await
            }
        });

        wait_for_subscriber(&broker).await;
        broker.publish("sophie", "status:offline");
        let posted = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(posted.as_deref(), Some("C"));

        token.cancel();
        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_broker_aborts_startup() {
        let broker = MemoryBroker::new();
        broker.set_healthy(false);
        let (notifier, _rx) = RecordingNotifier::new();

        let result = run_with(
            &config(PathBuf::from("statuses.toml")),
            catalog(),
            notifier,
            &broker,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::BrokerUnavailable(_))));
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_subscription_is_not_a_graceful_stop() {
        let (notifier, _rx) = RecordingNotifier::new();
        let token = CancellationToken::new();

        let result = timeout(
            Duration::from_secs(2),
            run_with(
                &config(PathBuf::from("statuses.toml")),
                catalog(),
                notifier,
                &DroppingBroker,
                token.clone(),
            ),
        )
        .await
        .expect("run_with did not return");

        assert!(matches!(result, Err(Error::BrokerUnavailable(_))));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_fails_on_missing_status_file() {
        let result = run(
            config(PathBuf::from("/nonexistent/statuses.toml")),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_cancelled_startup_probe_does_not_block() {
        let token = CancellationToken::new();
        token.cancel();
        let options = ProbeOptions {
            host: Some("192.0.2.1".to_string()),
            count: 4,
            timeout_secs: 3,
        };

        timeout(
            Duration::from_secs(1),
            probe_host("192.0.2.1", &options, &token),
        )
        .await
        .expect("probe ignored cancellation");
    }
}
