//! Catalog records carried by an event
//!
//! The adapters in this module read `$.data` of a received [`Event`] and
//! produce typed records. They never look at the routing-only parts of the
//! payload.
//!
//! [`Event`]: crate::event::Event

mod file;
mod transaction;

pub use file::File;
pub use transaction::{Transaction, TransactionKeyValue, PROVENANCE_KEY};

use crate::event::Event;
use crate::utils::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Catalog scalar: identifiers and key-value values are integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Integer(value) => write!(f, "{}", value),
            MetadataValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

/// `$.data` of the event, or a malformed-event error.
fn event_data(event: &Event) -> DispatchResult<&Value> {
    match event.data() {
        Some(data @ Value::Object(_)) => Ok(data),
        Some(_) => Err(DispatchError::malformed("event data must be an object")),
        None => Err(DispatchError::malformed("event has no data")),
    }
}

/// Deserialize an optional list under `$.data.<field>`; absent or null is empty.
fn data_list<T: serde::de::DeserializeOwned>(event: &Event, field: &str) -> DispatchResult<Vec<T>> {
    match event_data(event)?.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| DispatchError::malformed(format!("invalid data.{}: {}", field, e))),
    }
}
