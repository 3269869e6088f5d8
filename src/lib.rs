//! Maskinporten Operator Library
//!
//! This library provides the core functionality for the Maskinporten
//! operator: the `MaskinportenClient` CRD, the reconciler that keeps the
//! authority and per-app Secrets in sync with it, the typed authority API
//! client, and the key/certificate machinery behind JWKS rotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod authority;
pub mod caching;
pub mod clock;
pub mod config;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod metrics;
pub mod reconciler;
pub mod runtime;
pub mod secrets;
pub mod server;
pub mod state;

/// MaskinportenClient Custom Resource Definition
///
/// Declares that an app in this namespace needs a Maskinporten client with
/// the given scopes. The operator registers the client at the authority,
/// generates its signing keys, and maintains them in the app's Secret.
///
/// # Example
///
/// ```yaml
/// apiVersion: machine-identity.microscaler.io/v1alpha1
/// kind: MaskinportenClient
/// metadata:
///   name: app1
///   namespace: default
/// spec:
///   scopes:
///     - x:read
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine-identity.microscaler.io",
    version = "v1alpha1",
    kind = "MaskinportenClient",
    namespaced,
    status = "MaskinportenClientStatus",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"ClientId", "type":"string", "jsonPath":".status.clientId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MaskinportenClientSpec {
    /// Scopes the client is granted at the authority (ordered, non-empty)
    pub scopes: Vec<String>,
    /// Label value used to locate the app's Secret (`app=<appLabel>`)
    /// Defaults to the resource name
    #[serde(default)]
    pub app_label: Option<String>,
}

/// Status of the MaskinportenClient resource
///
/// Always reflects the most recent reconcile attempt. A healthy resource has
/// `state=reconciled` and `observedGeneration == metadata.generation`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaskinportenClientStatus {
    /// Current lifecycle state: recorded, reconciled, or error
    #[serde(default)]
    pub state: Option<String>,
    /// Human-readable description of the last outcome
    #[serde(default)]
    pub reason: Option<String>,
    /// Spec generation at the last successful reconcile
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Timestamp of the last reconcile attempt
    #[serde(default)]
    pub last_synced: Option<String>,
    /// Commands executed by the last reconcile
    #[serde(default)]
    pub last_actions: Vec<String>,
    /// Client id assigned by the authority
    #[serde(default)]
    pub client_id: Option<String>,
    /// Issuer URL at the last sync
    #[serde(default)]
    pub authority: Option<String>,
    /// Key ids currently installed in the app's JWKS
    #[serde(default)]
    pub key_ids: Vec<String>,
}
