use super::{data_list, event_data, MetadataValue};
use crate::event::Event;
use crate::utils::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};

/// Key under which a derived transaction points back at its source.
pub const PROVENANCE_KEY: &str = "Transactions._id";

/// A deposited data submission.
///
/// Received transactions carry the catalog-assigned `_id`; derived ones are
/// built without it and get a fresh identifier when uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MetadataValue>,
    pub submitter: MetadataValue,
    pub instrument: MetadataValue,
    pub project: MetadataValue,
}

impl Transaction {
    pub fn new(
        submitter: impl Into<MetadataValue>,
        instrument: impl Into<MetadataValue>,
        project: impl Into<MetadataValue>,
    ) -> Self {
        Self {
            id: None,
            submitter: submitter.into(),
            instrument: instrument.into(),
            project: project.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<MetadataValue>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Read `$.data.transaction`.
    pub fn from_event(event: &Event) -> DispatchResult<Self> {
        let value = event_data(event)?
            .get("transaction")
            .ok_or_else(|| DispatchError::malformed("event data has no transaction"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| DispatchError::malformed(format!("invalid data.transaction: {}", e)))
    }

    /// A new transaction for derived output: same submitter, instrument and
    /// project, never the source identifier.
    pub fn derive_from(source: &Transaction) -> Self {
        Self {
            id: None,
            submitter: source.submitter.clone(),
            instrument: source.instrument.clone(),
            project: source.project.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionKeyValue {
    pub key: String,
    pub value: MetadataValue,
}

impl TransactionKeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Read `$.data.transaction_key_values` (empty when absent).
    pub fn from_event(event: &Event) -> DispatchResult<Vec<Self>> {
        data_list(event, "transaction_key_values")
    }

    /// The `Transactions._id` link from a derived transaction to `source`.
    pub fn provenance(source: &Transaction) -> DispatchResult<Self> {
        let id = source.id.clone().ok_or_else(|| {
            DispatchError::malformed("source transaction has no _id to link provenance to")
        })?;
        Ok(Self::new(PROVENANCE_KEY, id))
    }

    pub fn is_provenance(&self) -> bool {
        self.key == PROVENANCE_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_with_data(data: serde_json::Value) -> Event {
        Event::from_payload(json!({
            "specversion": "1.0",
            "id": "evt-1",
            "source": "/catalog",
            "type": "transaction.created",
            "data": data
        }))
        .expect("valid envelope")
    }

    #[test]
    fn should_extract_transaction_with_identifier() {
        let event = event_with_data(json!({
            "transaction": {"_id": 42, "submitter": "alice", "instrument": "I1", "project": "P1"}
        }));

        let transaction = Transaction::from_event(&event).unwrap();

        assert_eq!(
            transaction,
            Transaction::new("alice", "I1", "P1").with_id(42i64)
        );
    }

    #[test]
    fn should_accept_numeric_catalog_identifiers() {
        let event = event_with_data(json!({
            "transaction": {"_id": "T-9", "submitter": 10, "instrument": 54, "project": "1234a"}
        }));

        let transaction = Transaction::from_event(&event).unwrap();

        assert_eq!(transaction.id, Some(MetadataValue::Text("T-9".into())));
        assert_eq!(transaction.submitter, MetadataValue::Integer(10));
    }

    #[test]
    fn should_reject_missing_transaction() {
        let event = event_with_data(json!({"files": []}));

        let err = Transaction::from_event(&event).unwrap_err();

        assert!(matches!(err, DispatchError::MalformedEvent(_)));
    }

    #[test]
    fn should_reject_transaction_missing_fields() {
        let event = event_with_data(json!({"transaction": {"_id": 1, "submitter": "alice"}}));

        assert!(matches!(
            Transaction::from_event(&event),
            Err(DispatchError::MalformedEvent(_))
        ));
    }

    #[test]
    fn should_reject_fractional_identifiers() {
        let event = event_with_data(json!({
            "transaction": {"_id": 4.5, "submitter": "a", "instrument": "b", "project": "c"}
        }));

        assert!(Transaction::from_event(&event).is_err());
    }

    #[test]
    fn should_derive_without_identifier() {
        let source = Transaction::new("alice", "I1", "P1").with_id(42i64);

        let derived = Transaction::derive_from(&source);

        assert_eq!(derived.id, None);
        assert_eq!(derived.submitter, source.submitter);
        assert_eq!(derived.instrument, source.instrument);
        assert_eq!(derived.project, source.project);
    }

    #[test]
    fn should_not_serialize_missing_identifier() {
        let derived = Transaction::new("alice", "I1", "P1");

        let json = serde_json::to_value(&derived).unwrap();

        assert_eq!(json, json!({"submitter": "alice", "instrument": "I1", "project": "P1"}));
    }

    #[test]
    fn should_build_provenance_from_source_identifier() {
        let source = Transaction::new("alice", "I1", "P1").with_id(42i64);

        let link = TransactionKeyValue::provenance(&source).unwrap();

        assert_eq!(link, TransactionKeyValue::new("Transactions._id", 42i64));
        assert!(link.is_provenance());
    }

    #[test]
    fn should_refuse_provenance_without_source_identifier() {
        let source = Transaction::new("alice", "I1", "P1");

        assert!(TransactionKeyValue::provenance(&source).is_err());
    }

    #[test]
    fn should_extract_key_values_or_default_to_empty() {
        let with = event_with_data(json!({
            "transaction": {},
            "transaction_key_values": [{"key": "campaign", "value": "spring"}, {"key": "run", "value": 7}]
        }));
        let without = event_with_data(json!({"transaction": {}}));

        assert_eq!(
            TransactionKeyValue::from_event(&with).unwrap(),
            vec![
                TransactionKeyValue::new("campaign", "spring"),
                TransactionKeyValue::new("run", 7i64)
            ]
        );
        assert!(TransactionKeyValue::from_event(&without).unwrap().is_empty());
    }

    #[test]
    fn should_reject_malformed_key_values() {
        let event = event_with_data(json!({"transaction_key_values": [{"key": "x"}]}));

        assert!(matches!(
            TransactionKeyValue::from_event(&event),
            Err(DispatchError::MalformedEvent(_))
        ));
    }
}
