//! # Persisted policy document.
//!
//! [`PolicyFile`] is the JSON document the external persistence collaborator
//! reads and writes: `{version, updatedAtMs, policies: [...]}`. This crate
//! only guarantees a lossless round trip and per-policy validation; merging
//! file entries with the built-in defaults at startup is the collaborator's
//! job (file entries may override non-default ids).

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::RetryError;
use crate::policy::policy::epoch_ms;
use crate::policy::RetryPolicy;

/// Current document schema version.
pub const POLICY_FILE_VERSION: u32 = 1;

/// Serialized policy collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFile {
    /// Document schema version.
    pub version: u32,
    /// Last write timestamp (epoch milliseconds on the wire).
    #[serde(rename = "updatedAtMs", with = "epoch_ms")]
    pub updated_at: SystemTime,
    /// The policies, in file order.
    pub policies: Vec<RetryPolicy>,
}

impl PolicyFile {
    /// Wraps the given policies into a current-version document.
    pub fn new(policies: Vec<RetryPolicy>) -> Self {
        Self {
            version: POLICY_FILE_VERSION,
            updated_at: now_ms(),
            policies,
        }
    }

    /// Parses a document and normalizes every policy in it.
    ///
    /// A malformed document or an invalid policy is an
    /// [`RetryError::Integration`] / [`RetryError::Validation`] respectively,
    /// so callers can distinguish "bad file" from "bad policy".
    pub fn from_json(json: &str) -> Result<Self, RetryError> {
        let raw: PolicyFile =
            serde_json::from_str(json).map_err(|e| RetryError::Integration {
                collaborator: "policy_persistence",
                reason: e.to_string(),
            })?;
        let mut policies = Vec::with_capacity(raw.policies.len());
        for policy in raw.policies {
            policies.push(policy.normalized()?);
        }
        Ok(Self { policies, ..raw })
    }

    /// Serializes the document as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, RetryError> {
        serde_json::to_string_pretty(self).map_err(|e| RetryError::Integration {
            collaborator: "policy_persistence",
            reason: e.to_string(),
        })
    }
}

/// Millisecond-truncated now, so documents survive the wire format unchanged.
fn now_ms() -> SystemTime {
    use std::time::{Duration, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64;
    UNIX_EPOCH + Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_of_builtin_defaults() {
        let file = PolicyFile::new(RetryPolicy::builtin_defaults());
        let json = file.to_json().unwrap();
        let back = PolicyFile::from_json(&json).unwrap();
        assert_eq!(file, back);
        assert_eq!(back.version, POLICY_FILE_VERSION);
    }

    #[test]
    fn malformed_document_is_integration_error() {
        let err = PolicyFile::from_json("{not json").unwrap_err();
        assert!(matches!(err, RetryError::Integration { .. }));
    }

    #[test]
    fn invalid_policy_is_validation_error() {
        let json = r#"{
            "version": 1,
            "updatedAtMs": 0,
            "policies": [{"id": "bad", "name": "Bad", "maxAttempts": 0}]
        }"#;
        let err = PolicyFile::from_json(json).unwrap_err();
        assert!(matches!(err, RetryError::Validation { field: "maxAttempts", .. }));
    }

    #[test]
    fn loading_normalizes_policies() {
        let json = r#"{
            "version": 1,
            "updatedAtMs": 0,
            "policies": [{"id": "p", "name": "P", "transientPatterns": ["TIMEOUT"]}]
        }"#;
        let file = PolicyFile::from_json(json).unwrap();
        assert_eq!(file.policies[0].transient_patterns, vec!["timeout"]);
        assert!(!file.policies[0].retry_conditions.is_empty());
    }
}
