//! Wire types for the Maskinporten authority and self-service APIs.
//!
//! Only the fields the operator reads or writes are modeled; everything else
//! the APIs return is ignored on deserialization.

use serde::{Deserialize, Serialize};

pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const INTEGRATION_TYPE_MASKINPORTEN: &str = "maskinporten";
pub const APPLICATION_TYPE_WEB: &str = "web";
pub const TOKEN_ENDPOINT_AUTH_PRIVATE_KEY_JWT: &str = "private_key_jwt";

/// `GET /.well-known/oauth-authorization-server`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
}

/// `POST /token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Body for `POST /clients` and `PUT /clients/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRequest {
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub scopes: Vec<String>,
    pub grant_types: Vec<String>,
    pub integration_type: String,
    pub application_type: String,
    pub token_endpoint_auth_method: String,
}

impl ClientRequest {
    /// The one client shape this operator manages: a machine client using
    /// the JWT bearer grant with private-key JWT authentication.
    pub fn machine_client(client_name: String, scopes: Vec<String>) -> Self {
        Self {
            client_name,
            description: None,
            scopes,
            grant_types: vec![GRANT_TYPE_JWT_BEARER.to_string()],
            integration_type: INTEGRATION_TYPE_MASKINPORTEN.to_string(),
            application_type: APPLICATION_TYPE_WEB.to_string(),
            token_endpoint_auth_method: TOKEN_ENDPOINT_AUTH_PRIVATE_KEY_JWT.to_string(),
        }
    }
}

/// A client record as returned by the self-service API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: String,
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}
