use std::{net::IpAddr, time::Duration};

use thiserror::Error;

use crate::catalog::Category;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable fetching error: {0}")]
    EnvVarNotSet(#[from] dotenvy::Error),
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("Malformed event payload {0:?}, expected <service_type>:<event_name>")]
    MalformedEvent(String),
    #[error("Unknown category {service_type}:{event_name}")]
    UnknownCategory {
        service_type: String,
        event_name: String,
    },
    #[error("No messages configured for category {0}")]
    EmptyCategory(Category),
    #[error("Notifier is not configured, call configure() first")]
    NotConfigured,
    #[error("Social API rejected the post ({status}): {body}")]
    SocialApi {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Destination host: {destination} unreachable (timeout {timeout:?})")]
    Unreachable {
        destination: IpAddr,
        timeout: Duration,
    },
    #[error("Wrong response! Wanted: {expected}, given: {actual}")]
    WrongReplyType { expected: String, actual: String },
    #[error("ICMP protocol error: {0}")]
    IcmpProtocol(String),
    #[error("Could not resolve {0} to an IPv4 address")]
    Resolve(String),
}
