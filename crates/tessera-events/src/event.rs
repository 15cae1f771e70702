//! Invalidation event model and wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_core::{EntityId, TesseraResult};

/// What changed about an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationType {
    ProfileUpdated,
    StatusChanged,
    UserUpdated,
    RoleChanged,
    Deleted,
    ValidationChanged,
    SubscriptionChanged,
}

impl InvalidationType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileUpdated => "ProfileUpdated",
            Self::StatusChanged => "StatusChanged",
            Self::UserUpdated => "UserUpdated",
            Self::RoleChanged => "RoleChanged",
            Self::Deleted => "Deleted",
            Self::ValidationChanged => "ValidationChanged",
            Self::SubscriptionChanged => "SubscriptionChanged",
        }
    }
}

impl fmt::Display for InvalidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Announcement that an authoritative entity changed.
///
/// Serialized as camelCase JSON:
/// `{"userId": "...", "type": "ProfileUpdated", "timestamp": "...", "reason": null}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    #[serde(rename = "userId")]
    pub entity_id: EntityId,
    #[serde(rename = "type")]
    pub kind: InvalidationType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl InvalidationEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(entity_id: EntityId, kind: InvalidationType) -> Self {
        Self {
            entity_id,
            kind,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Routing key used by transports: the entity id.
    #[must_use]
    pub fn routing_key(&self) -> String {
        self.entity_id.to_string()
    }

    pub fn to_json(&self) -> TesseraResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> TesseraResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_wire_format() {
        let id = EntityId::new();
        let event = InvalidationEvent::new(id, InvalidationType::ProfileUpdated);
        let json: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["userId"], Value::String(id.to_string()));
        assert_eq!(json["type"], "ProfileUpdated");
        assert!(json["timestamp"].is_string());
        assert!(json["reason"].is_null());
        assert_eq!(json.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_parses_foreign_payload() {
        let payload = r#"{
            "userId": "0191e5b2-7c3a-7d4e-9f10-1a2b3c4d5e6f",
            "type": "StatusChanged",
            "timestamp": "2024-09-01T12:30:00Z",
            "reason": "account suspended"
        }"#;
        let event = InvalidationEvent::from_json(payload).unwrap();
        assert_eq!(event.kind, InvalidationType::StatusChanged);
        assert_eq!(event.reason.as_deref(), Some("account suspended"));
        assert_eq!(event.routing_key(), "0191e5b2-7c3a-7d4e-9f10-1a2b3c4d5e6f");
    }

    #[test]
    fn test_missing_reason_defaults_to_none() {
        let payload = r#"{"userId":"0191e5b2-7c3a-7d4e-9f10-1a2b3c4d5e6f","type":"Deleted","timestamp":"2024-09-01T12:30:00Z"}"#;
        assert_eq!(InvalidationEvent::from_json(payload).unwrap().reason, None);
    }

    #[test]
    fn test_rejects_unknown_type() {
        let payload = r#"{"userId":"0191e5b2-7c3a-7d4e-9f10-1a2b3c4d5e6f","type":"Exploded","timestamp":"2024-09-01T12:30:00Z","reason":null}"#;
        assert!(InvalidationEvent::from_json(payload).is_err());
    }

    #[test]
    fn test_round_trip_keeps_reason() {
        let event = InvalidationEvent::new(EntityId::new(), InvalidationType::RoleChanged)
            .with_reason("promoted");
        let parsed = InvalidationEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.kind.to_string(), "RoleChanged");
    }
}
