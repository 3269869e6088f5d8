//! The operator-owned payload inside each app Secret.
//!
//! Workloads mount a single JSON document (`maskinporten-client.json`) with
//! the assigned client id, the authority URL, and the full private JWKS they
//! sign token grants with. The Secret object itself belongs to the workload;
//! the operator only owns this one entry.

use crate::constants::{APP_LABEL_KEY, SECRET_DATA_KEY};
use crate::crypto::jwks::Jwks;
use anyhow::{bail, Context, Result};
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Contents of `maskinporten-client.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretPayload {
    pub client_id: String,
    pub authority_url: String,
    pub jwks: Jwks,
}

impl SecretPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize secret payload")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("failed to deserialize secret payload")
    }
}

/// Extract the operator's payload from a Secret, if the entry exists.
pub fn payload_from_secret(secret: &Secret) -> Result<Option<SecretPayload>> {
    let Some(data) = secret.data.as_ref() else {
        return Ok(None);
    };
    match data.get(SECRET_DATA_KEY) {
        Some(bytes) => Ok(Some(SecretPayload::from_bytes(&bytes.0)?)),
        None => Ok(None),
    }
}

/// Validate a Secret found via the app label selector.
pub fn check_secret_type(secret: &Secret) -> Result<()> {
    match secret.type_.as_deref() {
        Some(SECRET_TYPE_OPAQUE) | None => Ok(()),
        Some(other) => bail!("unexpected secret type: {other} (expected {SECRET_TYPE_OPAQUE})"),
    }
}

/// Build a fresh Secret object carrying the payload, labeled so the workload
/// and future reconciles can find it.
pub fn build_secret(
    name: &str,
    namespace: &str,
    app_label: &str,
    payload: &SecretPayload,
) -> Result<Secret> {
    let json = String::from_utf8(payload.to_bytes()?).context("payload is not valid UTF-8")?;

    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL_KEY.to_string(), app_label.to_string());

    let mut string_data = BTreeMap::new();
    string_data.insert(SECRET_DATA_KEY.to_string(), json);

    Ok(Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_OPAQUE.to_string()),
        string_data: Some(string_data),
        immutable: Some(false),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::jwks::Jwk;
    use k8s_openapi::ByteString;

    fn payload() -> SecretPayload {
        SecretPayload {
            client_id: "d2b1".to_string(),
            authority_url: "https://maskinporten.dev".to_string(),
            jwks: Jwks {
                keys: vec![Jwk {
                    kty: "RSA".to_string(),
                    kid: "a.0".to_string(),
                    use_: "sig".to_string(),
                    alg: "RS256".to_string(),
                    n: "AQAB".to_string(),
                    e: "AQAB".to_string(),
                    d: Some("AQAB".to_string()),
                    p: Some("AQAB".to_string()),
                    q: Some("AQAB".to_string()),
                    dp: None,
                    dq: None,
                    qi: None,
                    x5c: None,
                }],
            },
        }
    }

    #[test]
    fn payload_round_trips() {
        let original = payload();
        let restored = SecretPayload::from_bytes(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn payload_wire_shape_is_stable() {
        let json: serde_json::Value =
            serde_json::from_slice(&payload().to_bytes().unwrap()).unwrap();
        assert_eq!(json["client_id"], "d2b1");
        assert_eq!(json["authority_url"], "https://maskinporten.dev");
        assert_eq!(json["jwks"]["keys"][0]["kid"], "a.0");
        assert_eq!(json["jwks"]["keys"][0]["use"], "sig");
    }

    #[test]
    fn missing_entry_reads_as_none() {
        let secret = Secret::default();
        assert!(payload_from_secret(&secret).unwrap().is_none());

        let mut data = BTreeMap::new();
        data.insert(
            "unrelated-key".to_string(),
            ByteString(b"other".to_vec()),
        );
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };
        assert!(payload_from_secret(&secret).unwrap().is_none());
    }

    #[test]
    fn stored_entry_is_parsed() {
        let mut data = BTreeMap::new();
        data.insert(
            SECRET_DATA_KEY.to_string(),
            ByteString(payload().to_bytes().unwrap()),
        );
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };
        assert_eq!(payload_from_secret(&secret).unwrap().unwrap(), payload());
    }

    #[test]
    fn non_opaque_secret_is_rejected() {
        let secret = Secret {
            type_: Some("kubernetes.io/tls".to_string()),
            ..Default::default()
        };
        assert!(check_secret_type(&secret).is_err());

        let opaque = Secret {
            type_: Some(SECRET_TYPE_OPAQUE.to_string()),
            ..Default::default()
        };
        assert!(check_secret_type(&opaque).is_ok());
    }

    #[test]
    fn built_secret_carries_label_and_entry() {
        let secret = build_secret("app1", "default", "app1", &payload()).unwrap();
        assert_eq!(
            secret.metadata.labels.as_ref().unwrap().get(APP_LABEL_KEY),
            Some(&"app1".to_string())
        );
        assert!(secret
            .string_data
            .as_ref()
            .unwrap()
            .contains_key(SECRET_DATA_KEY));
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE_OPAQUE));
    }
}
