use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::catalog::LateWindow;
use crate::error::Error;

/// Overrides the default configuration file location.
pub const CONFIG_PATH_VAR: &str = "HOWS_SOPHIE_CONFIG";

const APP_DIR: &str = "hows-sophie";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerOptions,
    pub statuses: StatusOptions,
    #[serde(default)]
    pub twitter: TwitterOptions,
    #[serde(default)]
    pub probe: ProbeOptions,
}

#[derive(Debug, Deserialize)]
pub struct BrokerOptions {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusOptions {
    pub path: PathBuf,
    pub late_from_hour: Option<u32>,
    pub late_until_hour: Option<u32>,
}

#[derive(Deserialize)]
pub struct TwitterOptions {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_post_timeout")]
    pub timeout_secs: u64,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeOptions {
    pub host: Option<String>,
    #[serde(default = "default_probe_count")]
    pub count: u16,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

/// Tokens for the social API. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

fn default_broker_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_topic() -> String {
    "sophie".to_string()
}

fn default_api_base() -> String {
    "https://api.twitter.com".to_string()
}

fn default_post_timeout() -> u64 {
    10
}

fn default_probe_count() -> u16 {
    4
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            topic: default_topic(),
        }
    }
}

impl Default for TwitterOptions {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_post_timeout(),
            consumer_key: None,
            consumer_secret: None,
            access_token: None,
            access_token_secret: None,
        }
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            host: None,
            count: default_probe_count(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl Config {
    /// Loads the configuration from `$HOWS_SOPHIE_CONFIG`, or from
    /// `<config dir>/hows-sophie/config.toml` when the variable is unset.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load_from`], or [`Error::Config`] when no config
    /// directory can be determined.
    pub fn load() -> Result<Config, Error> {
        Self::load_from(Self::default_path()?)
    }

    /// # Errors
    ///
    /// [`Error::Config`] if the variable is unset and the platform has no
    /// config directory.
    pub fn default_path() -> Result<PathBuf, Error> {
        if let Ok(path) = dotenvy::var(CONFIG_PATH_VAR) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| Error::Config("could not determine the config directory".to_string()))
    }

    /// Reads and validates the file at `path`. A relative status file path is
    /// resolved against the directory of `path`.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] or [`Error::TomlParse`] for an unreadable file,
    /// [`Error::Config`] for invalid values.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // status file paths are relative to the config file
        if config.statuses.path.is_relative() {
            if let Some(parent) = path.parent() {
                config.statuses.path = parent.join(&config.statuses.path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.broker.topic.is_empty() {
            return Err(Error::Config("broker.topic must not be empty".to_string()));
        }
        if self.probe.count == 0 {
            return Err(Error::Config("probe.count must be at least 1".to_string()));
        }
        if self.probe.timeout_secs == 0 {
            return Err(Error::Config(
                "probe.timeout_secs must be at least 1".to_string(),
            ));
        }
        self.statuses.late_window()?;
        Ok(())
    }
}

impl StatusOptions {
    /// # Errors
    ///
    /// [`Error::Config`] if only one hour is set or the hours are invalid.
    pub fn late_window(&self) -> Result<Option<LateWindow>, Error> {
        match (self.late_from_hour, self.late_until_hour) {
            (None, None) => Ok(None),
            (Some(from), Some(until)) => LateWindow::new(from, until).map(Some),
            _ => Err(Error::Config(
                "statuses.late_from_hour and statuses.late_until_hour must be set together"
                    .to_string(),
            )),
        }
    }
}

impl TwitterOptions {
    /// Resolves the four tokens, falling back to `TWITTER_*` environment
    /// variables for any that the file leaves out.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first token found in neither place.
    pub fn credentials(&self) -> Result<Credentials, Error> {
        Ok(Credentials {
            consumer_key: secret_or_env(self.consumer_key.as_ref(), "TWITTER_CONSUMER_KEY")?,
            consumer_secret: secret_or_env(
                self.consumer_secret.as_ref(),
                "TWITTER_CONSUMER_SECRET",
            )?,
            access_token: secret_or_env(self.access_token.as_ref(), "TWITTER_ACCESS_TOKEN")?,
            access_token_secret: secret_or_env(
                self.access_token_secret.as_ref(),
                "TWITTER_ACCESS_TOKEN_SECRET",
            )?,
        })
    }
}

fn secret_or_env(value: Option<&String>, var: &str) -> Result<String, Error> {
    match value {
        Some(value) => Ok(value.clone()),
        None => dotenvy::var(var).map_err(|e| {
            Error::Config(format!("{var} is not set in the config file or environment: {e}"))
        }),
    }
}

impl fmt::Debug for TwitterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterOptions")
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials { <redacted> }")
    }
}
