//! Feed record normalization

use atgraph_types::{Did, Handle, NormalizedIdentity};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

const AKA_PREFIX: &str = "at://";
const PDS_SERVICE: &str = "atproto_pds";
const TOMBSTONE: &str = "plc_tombstone";

/// Normalize one raw directory record into the canonical identity shape.
///
/// Two record shapes are understood: the create-style operation carrying
/// `handle` and `service` directly, and the operation shape carrying an
/// `alsoKnownAs` list plus a service map keyed by the PDS service name.
/// Tombstones are skipped quietly; anything else unrecognized is skipped
/// with a warning so the walker keeps making progress.
pub fn normalize(raw: &Value) -> Option<NormalizedIdentity> {
    let Some(did) = raw.get("did").and_then(Value::as_str) else {
        warn!("skipping directory record without a did");
        return None;
    };
    let created_at = match raw.get("createdAt").and_then(Value::as_str) {
        Some(ts) => match DateTime::parse_from_rfc3339(ts) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(did, error = %e, "skipping record with unparseable createdAt");
                return None;
            }
        },
        None => {
            warn!(did, "skipping record without createdAt");
            return None;
        }
    };
    let Some(operation) = raw.get("operation").filter(|op| op.is_object()) else {
        warn!(did, "skipping record without an operation object");
        return None;
    };

    if operation.get("type").and_then(Value::as_str) == Some(TOMBSTONE) {
        debug!(did, "skipping tombstone");
        return None;
    }

    // Create-style shape: handle and service endpoint sit on the operation.
    if let Some(handle) = operation.get("handle").and_then(Value::as_str) {
        return Some(NormalizedIdentity {
            did: Did::new(did),
            handle: Some(Handle::new(handle)),
            pds_endpoint: operation
                .get("service")
                .and_then(Value::as_str)
                .map(str::to_string),
            created_at,
        });
    }

    // Operation shape: first also-known-as URI plus the PDS service map.
    if let Some(aka) = operation.get("alsoKnownAs").and_then(Value::as_array) {
        let handle = aka
            .iter()
            .filter_map(Value::as_str)
            .find(|uri| uri.starts_with(AKA_PREFIX))
            .map(Handle::new);
        let pds_endpoint = operation
            .pointer(&format!("/services/{PDS_SERVICE}/endpoint"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Some(NormalizedIdentity {
            did: Did::new(did),
            handle,
            pds_endpoint,
            created_at,
        });
    }

    warn!(did, "skipping directory record of unknown shape");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_style_shape() {
        let raw = json!({
            "did": "did:plc:abc123",
            "createdAt": "2024-01-01T00:00:00Z",
            "operation": {
                "type": "create",
                "handle": "alice.example.com",
                "service": "https://pds.example.com"
            }
        });
        let identity = normalize(&raw).unwrap();
        assert_eq!(identity.did, Did::new("did:plc:abc123"));
        assert_eq!(identity.handle, Some(Handle::new("alice.example.com")));
        assert_eq!(
            identity.pds_endpoint.as_deref(),
            Some("https://pds.example.com")
        );
    }

    #[test]
    fn operation_shape_with_service_map() {
        let raw = json!({
            "did": "did:plc:abc123",
            "createdAt": "2024-01-01T00:00:00Z",
            "operation": {
                "type": "plc_operation",
                "alsoKnownAs": ["at://alice.example.com", "https://alice.example.com"],
                "services": {
                    "atproto_pds": {
                        "type": "AtprotoPersonalDataServer",
                        "endpoint": "https://pds.example.com"
                    }
                }
            }
        });
        let identity = normalize(&raw).unwrap();
        assert_eq!(identity.handle, Some(Handle::new("alice.example.com")));
        assert_eq!(
            identity.pds_endpoint.as_deref(),
            Some("https://pds.example.com")
        );
    }

    #[test]
    fn operation_shape_without_usable_alias_keeps_the_key() {
        let raw = json!({
            "did": "did:plc:abc123",
            "createdAt": "2024-01-01T00:00:00Z",
            "operation": {
                "type": "plc_operation",
                "alsoKnownAs": ["https://alice.example.com"],
                "services": {}
            }
        });
        let identity = normalize(&raw).unwrap();
        assert_eq!(identity.handle, None);
        assert_eq!(identity.pds_endpoint, None);
    }

    #[test]
    fn tombstone_is_skipped() {
        let raw = json!({
            "did": "did:plc:abc123",
            "createdAt": "2024-01-01T00:00:00Z",
            "operation": { "type": "plc_tombstone" }
        });
        assert!(normalize(&raw).is_none());
    }

    #[test]
    fn unknown_shape_is_skipped() {
        let raw = json!({
            "did": "did:plc:abc123",
            "createdAt": "2024-01-01T00:00:00Z",
            "operation": { "type": "mystery", "payload": 42 }
        });
        assert!(normalize(&raw).is_none());
    }

    #[test]
    fn missing_fields_are_skipped() {
        assert!(normalize(&json!({})).is_none());
        assert!(normalize(&json!({ "did": "did:plc:abc123" })).is_none());
        assert!(normalize(&json!({
            "did": "did:plc:abc123",
            "createdAt": "not-a-timestamp",
            "operation": { "handle": "alice.example.com" }
        }))
        .is_none());
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!({
            "did": "did:plc:abc123",
            "createdAt": "2024-01-01T00:00:00Z",
            "operation": {
                "type": "plc_operation",
                "alsoKnownAs": ["at://Alice.Example.Com"],
                "services": {
                    "atproto_pds": { "endpoint": "https://pds.example.com" }
                }
            }
        });
        let first = normalize(&raw).unwrap();
        let second = normalize(&raw).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.handle, Some(Handle::new("alice.example.com")));
    }
}
