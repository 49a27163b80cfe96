//! Posts a status message whenever a monitored host goes online or offline.
//!
//! Events arrive on a pub/sub topic as `<service_type>:<event_name>`, a
//! message is picked from the [`catalog::StatusCatalog`] and published
//! through a [`notifier::Notifier`].

pub mod broker;
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod notifier;
pub mod probe;
pub mod router;
pub mod worker;

pub use error::Error;
