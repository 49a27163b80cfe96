use std::{fmt, str::FromStr};

use crate::error::Error;

/// A host state change, published as `<service_type>:<event_name>`
/// (e.g. `status:online`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub service_type: String,
    pub event_name: String,
}

impl FromStr for Event {
    type Err = Error;

    /// Splits on the first colon; both halves must be non-empty.
    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        let trimmed = payload.trim();
        match trimmed.split_once(':') {
            Some((service_type, event_name))
                if !service_type.is_empty() && !event_name.is_empty() =>
            {
                Ok(Event {
                    service_type: service_type.to_string(),
                    event_name: event_name.to_string(),
                })
            }
            _ => Err(Error::MalformedEvent(payload.to_string())),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_type, self.event_name)
    }
}
