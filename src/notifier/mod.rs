pub mod oauth;

use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::{Credentials, TwitterOptions};
use crate::error::Error;

/// Publishes a text message to an external account.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post_message(&self, text: &str) -> Result<(), Error>;
}

/// Posts tweets through the Twitter v2 API.
///
/// Created unconfigured; every post fails with [`Error::NotConfigured`] until
/// [`TwitterNotifier::configure`] has been called.
pub struct TwitterNotifier {
    api_base: Url,
    timeout: Duration,
    client: Option<ConfiguredClient>,
}

struct ConfiguredClient {
    http: Client,
    credentials: Credentials,
}

#[derive(Serialize)]
struct TweetRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

impl TwitterNotifier {
    /// Endpoints are resolved below `options.api_base`, keeping any path
    /// prefix it carries.
    ///
    /// # Errors
    ///
    /// [`Error::UrlParse`] if `api_base` is not an absolute URL.
    pub fn new(options: &TwitterOptions) -> Result<Self, Error> {
        let mut api_base = Url::parse(&options.api_base)?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        Ok(Self {
            api_base,
            timeout: Duration::from_secs(options.timeout_secs),
            client: None,
        })
    }

    /// # Errors
    ///
    /// [`Error::HttpRequest`] if the HTTP client cannot be built.
    pub fn configure(&mut self, credentials: Credentials) -> Result<(), Error> {
        let http = Client::builder().timeout(self.timeout).build()?;
        self.client = Some(ConfiguredClient { http, credentials });
        Ok(())
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl Notifier for TwitterNotifier {
    async fn post_message(&self, text: &str) -> Result<(), Error> {
        let client = self.client.as_ref().ok_or(Error::NotConfigured)?;

        let url = self.api_base.join("2/tweets")?;
        let authorization = oauth::authorization_header("POST", &url, &client.credentials)?;

        let response = client
            .http
            .post(url)
            .header(AUTHORIZATION, authorization)
            .json(&TweetRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SocialApi { status, body });
        }

        match response.json::<TweetResponse>().await {
            Ok(tweet) => info!("Posted tweet {}", tweet.data.id),
            Err(e) => warn!("Tweet posted but the response could not be read: {e}"),
        }
        Ok(())
    }
}

/// Test double that forwards every post to a channel.
#[cfg(test)]
pub(crate) struct RecordingNotifier {
    posts: tokio::sync::mpsc::UnboundedSender<String>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn new() -> (
        std::sync::Arc<Self>,
        tokio::sync::mpsc::UnboundedReceiver<String>,
    ) {
        let (posts, rx) = tokio::sync::mpsc::unbounded_channel();
        (std::sync::Arc::new(Self { posts }), rx)
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post_message(&self, text: &str) -> Result<(), Error> {
        self.posts.send(text.to_string()).ok();
        Ok(())
    }
}
