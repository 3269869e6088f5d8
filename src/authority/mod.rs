//! Typed client for the Maskinporten authority and self-service APIs.
//!
//! Handles bearer-token auth end to end: discovery documents and access
//! tokens live in single-flight TTL caches, tokens are acquired with a
//! self-signed RS256 JWT grant, and every request is retried with
//! exponential backoff on transport failures and 5xx responses. Client
//! names are namespaced with the operator prefix so tenants sharing one
//! authority never see each other's records.
//!
//! Docs:
//!   - https://docs.digdir.no/docs/Maskinporten/maskinporten_protocol_token
//!   - https://docs.digdir.no/docs/Maskinporten/maskinporten_func_wellknown
//!   - Self service API: https://api.samarbeid.digdir.dev/swagger-ui/index.html

pub mod backoff;
pub mod error;
pub mod models;

use crate::caching::CachedAtom;
use crate::clock::Clock;
use crate::config::AuthorityApiConfig;
use crate::constants::{
    ACCESS_TOKEN_TTL_SECS, BACKOFF_MAX_ELAPSED_MS, GRANT_LIFETIME_SECS, RUN_ID_HEADER,
    WELL_KNOWN_TTL_SECS,
};
use crate::context::OperatorContext;
use crate::crypto::jwks::{Jwk, Jwks};
use crate::metrics;
use backoff::ExponentialBackoff;
use chrono::Utc;
use error::ApiError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use models::{ClientRecord, ClientRequest, DiscoveryDocument, TokenResponse, GRANT_TYPE_JWT_BEARER};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use rsa::pkcs1::EncodeRsaPrivateKey as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct AuthorityClient {
    core: Arc<ClientCore>,
    well_known: CachedAtom<DiscoveryDocument>,
    access_token: CachedAtom<TokenResponse>,
    client_name_prefix: String,
}

/// Shared connection state, cloneable into cache fetch tasks.
struct ClientCore {
    http: reqwest::Client,
    config: AuthorityApiConfig,
    run_id: String,
    signing_key: EncodingKey,
    signing_kid: Option<String>,
}

impl AuthorityClient {
    pub fn new(
        config: AuthorityApiConfig,
        context: &OperatorContext,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ApiError> {
        let jwk: Jwk = serde_json::from_str(&config.jwk)
            .map_err(|err| ApiError::InvalidJwk(err.to_string()))?;
        let private_key = jwk
            .to_private_key()
            .map_err(|err| ApiError::InvalidJwk(err.to_string()))?;
        let pkcs1 = private_key
            .to_pkcs1_der()
            .map_err(|err| ApiError::InvalidJwk(err.to_string()))?;
        let signing_key = EncodingKey::from_rsa_der(pkcs1.as_bytes());

        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| ApiError::Invalid(format!("failed to build HTTP client: {err}")))?;

        let core = Arc::new(ClientCore {
            http,
            config,
            run_id: context.run_id.clone(),
            signing_key,
            signing_kid: Some(jwk.kid),
        });

        Ok(Self {
            core,
            well_known: CachedAtom::new(
                chrono::Duration::seconds(WELL_KNOWN_TTL_SECS),
                clock.clone(),
            ),
            access_token: CachedAtom::new(chrono::Duration::seconds(ACCESS_TOKEN_TTL_SECS), clock),
            client_name_prefix: context.client_name_prefix(),
        })
    }

    /// Cached discovery document (5 minute TTL).
    pub async fn discovery(&self) -> Result<Arc<DiscoveryDocument>, ApiError> {
        let core = self.core.clone();
        self.well_known
            .get(move || async move { core.fetch_discovery().await })
            .await
    }

    /// Cached access token (1 minute TTL). A cache miss signs a fresh JWT
    /// grant and exchanges it at the token endpoint.
    pub async fn access_token(&self) -> Result<Arc<TokenResponse>, ApiError> {
        let discovery = self.discovery().await?;
        let core = self.core.clone();
        self.access_token
            .get(move || async move { core.fetch_access_token(&discovery).await })
            .await
    }

    /// All client records owned by this operator. Records without the
    /// operator prefix belong to other tenants and are filtered out.
    pub async fn get_all_clients(&self) -> Result<Vec<ClientRecord>, ApiError> {
        let url = self.core.self_service_path(&["clients"]);
        let request = self.authed(Method::GET, &url).await?;
        let response = self.core.send_with_retry(&url, request).await?;
        let response = expect_status(response, StatusCode::OK, &url).await?;
        let records: Vec<ClientRecord> = read_json(response, &url).await?;
        Ok(filter_owned(records, &self.client_name_prefix))
    }

    /// A single client record plus its public JWKS, or `None` when the
    /// authority reports 404 for the record itself. A record that exists but
    /// has no JWKS yet (an orphaned create) yields `(record, None)`.
    pub async fn get_client(
        &self,
        client_id: &str,
    ) -> Result<Option<(ClientRecord, Option<Jwks>)>, ApiError> {
        if client_id.is_empty() {
            return Err(ApiError::Invalid("missing id on client lookup".to_string()));
        }

        let url = self.core.self_service_path(&["clients", client_id]);
        let request = self.authed(Method::GET, &url).await?;
        let response = self.core.send_with_retry(&url, request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_status(response, StatusCode::OK, &url).await?;
        let record: ClientRecord = read_json(response, &url).await?;

        if !record.client_name.starts_with(&self.client_name_prefix) {
            return Err(ApiError::ForeignClient(record.client_name));
        }

        let jwks = self.get_client_jwks(client_id).await?;
        Ok(Some((record, jwks)))
    }

    /// Scan the owned records for an exact client-name match. Used when no
    /// client id is known locally.
    pub async fn find_client_by_name(
        &self,
        client_name: &str,
    ) -> Result<Option<ClientRecord>, ApiError> {
        let clients = self.get_all_clients().await?;
        Ok(clients
            .into_iter()
            .find(|record| record.client_name == client_name))
    }

    async fn get_client_jwks(&self, client_id: &str) -> Result<Option<Jwks>, ApiError> {
        let url = self.core.self_service_path(&["clients", client_id, "jwks"]);
        let request = self.authed(Method::GET, &url).await?;
        let response = self.core.send_with_retry(&url, request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_status(response, StatusCode::OK, &url).await?;
        Ok(Some(read_json(response, &url).await?))
    }

    /// Create a client and immediately install its public JWKS. A failed
    /// JWKS push after a successful create surfaces as `PostCreateOrphan`
    /// so the next reconcile can finish the job.
    pub async fn create_client(
        &self,
        client: &ClientRequest,
        jwks: &Jwks,
    ) -> Result<ClientRecord, ApiError> {
        assert_public(jwks, &client.client_name)?;

        let url = self.core.self_service_path(&["clients"]);
        let request = self.authed(Method::POST, &url).await?.json(client);
        let response = self.core.send_with_retry(&url, request).await?;
        let response = expect_status(response, StatusCode::CREATED, &url).await?;
        let record: ClientRecord = read_json(response, &url).await?;

        if let Err(err) = self.create_client_jwks(&record.client_id, jwks).await {
            return Err(ApiError::PostCreateOrphan {
                client_id: record.client_id,
                source: Box::new(err),
            });
        }

        Ok(record)
    }

    /// Replace the public JWKS installed for a client.
    pub async fn create_client_jwks(&self, client_id: &str, jwks: &Jwks) -> Result<(), ApiError> {
        if client_id.is_empty() {
            return Err(ApiError::Invalid(
                "missing id on client for JWKS upload".to_string(),
            ));
        }
        assert_public(jwks, client_id)?;

        let url = self.core.self_service_path(&["clients", client_id, "jwks"]);
        let request = self.authed(Method::POST, &url).await?.json(jwks);
        let response = self.core.send_with_retry(&url, request).await?;
        expect_status(response, StatusCode::CREATED, &url).await?;
        Ok(())
    }

    pub async fn update_client(
        &self,
        client_id: &str,
        client: &ClientRequest,
    ) -> Result<ClientRecord, ApiError> {
        if client_id.is_empty() {
            return Err(ApiError::Invalid(format!(
                "tried to update client with empty id for client name: {}",
                client.client_name
            )));
        }

        let url = self.core.self_service_path(&["clients", client_id]);
        let request = self.authed(Method::PUT, &url).await?.json(client);
        let response = self.core.send_with_retry(&url, request).await?;
        let response = expect_status(response, StatusCode::OK, &url).await?;
        read_json(response, &url).await
    }

    pub async fn delete_client(&self, client_id: &str) -> Result<(), ApiError> {
        if client_id.is_empty() {
            return Err(ApiError::Invalid(
                "tried to delete client with empty id".to_string(),
            ));
        }

        let url = self.core.self_service_path(&["clients", client_id]);
        let request = self.authed(Method::DELETE, &url).await?;
        let response = self.core.send_with_retry(&url, request).await?;
        expect_status(response, StatusCode::OK, &url).await?;
        Ok(())
    }

    async fn authed(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder, ApiError> {
        let token = self.access_token().await?;
        Ok(self
            .core
            .http
            .request(method, url)
            .bearer_auth(&token.access_token)
            .header(ACCEPT, "application/json"))
    }
}

#[derive(Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
    scope: &'a str,
}

impl ClientCore {
    async fn fetch_discovery(self: Arc<Self>) -> Result<DiscoveryDocument, ApiError> {
        let url = self.authority_path("/.well-known/oauth-authorization-server");
        let request = self.http.get(&url);
        let response = self.send_with_retry(&url, request).await?;
        let response = expect_status(response, StatusCode::OK, &url).await?;
        read_json(response, &url).await
    }

    async fn fetch_access_token(
        self: Arc<Self>,
        discovery: &DiscoveryDocument,
    ) -> Result<TokenResponse, ApiError> {
        let grant = self.create_grant(&discovery.issuer)?;

        let url = self.authority_path("/token");
        let request = self
            .http
            .post(&url)
            .query(&[
                ("grant_type", GRANT_TYPE_JWT_BEARER),
                ("assertion", grant.as_str()),
            ])
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");

        let response = self.send_with_retry(&url, request).await?;
        let response = expect_status(response, StatusCode::OK, &url).await?;
        let token: TokenResponse = read_json(response, &url).await?;
        debug!(expires_in = token.expires_in, "acquired access token");
        Ok(token)
    }

    /// Sign a short-lived JWT grant with the operator's long-lived JWK.
    fn create_grant(&self, issuer: &str) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = GrantClaims {
            iss: &self.config.client_id,
            aud: issuer,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: now.timestamp() + GRANT_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
            scope: &self.config.scope,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.signing_kid.clone();
        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|err| ApiError::Invalid(format!("failed to sign token grant: {err}")))
    }

    /// Send with retries: transport failures and 5xx retry under exponential
    /// backoff until the elapsed budget runs out; anything below 500 is
    /// returned to the caller for status handling.
    async fn send_with_retry(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, ApiError> {
        let mut backoff = ExponentialBackoff::authority_default();
        let budget = Duration::from_millis(BACKOFF_MAX_ELAPSED_MS);
        let started = Instant::now();

        loop {
            let attempt = request.try_clone().ok_or_else(|| {
                ApiError::Invalid(format!("request to {url} is not replayable"))
            })?;
            metrics::increment_authority_requests();

            let last_error = match attempt.header(RUN_ID_HEADER, &self.run_id).send().await {
                Ok(response) if response.status().as_u16() < 500 => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    ApiError::Status {
                        url: url.to_string(),
                        status,
                        body,
                    }
                }
                Err(source) => ApiError::Transport {
                    url: url.to_string(),
                    source,
                },
            };

            let delay = backoff.next_interval();
            if started.elapsed() + delay >= budget {
                return Err(ApiError::RetriesExhausted {
                    url: url.to_string(),
                    source: Box::new(last_error),
                });
            }

            warn!(url, delay_ms = delay.as_millis() as u64, error = %last_error, "retrying authority request");
            metrics::increment_authority_request_retries();
            tokio::time::sleep(delay).await;
        }
    }

    fn authority_path(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.config.authority_url.trim_end_matches('/'),
            path
        )
    }

    fn self_service_path(&self, segments: &[&str]) -> String {
        let mut url = self.config.self_service_url.trim_end_matches('/').to_string();
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        url
    }
}

fn assert_public(jwks: &Jwks, owner: &str) -> Result<(), ApiError> {
    if jwks.is_public() {
        Ok(())
    } else {
        Err(ApiError::PrivateKeyLeak(owner.to_string()))
    }
}

fn filter_owned(records: Vec<ClientRecord>, prefix: &str) -> Vec<ClientRecord> {
    records
        .into_iter()
        .filter(|record| record.client_name.starts_with(prefix))
        .collect()
}

async fn expect_status(
    response: Response,
    expected: StatusCode,
    url: &str,
) -> Result<Response, ApiError> {
    if response.status() == expected {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        url: url.to_string(),
        status,
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
    response
        .json()
        .await
        .map_err(|err| ApiError::MalformedResponse {
            url: url.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::crypto::CryptoService;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(client_name: &str) -> ClientRecord {
        ClientRecord {
            client_id: Uuid::new_v4().to_string(),
            client_name: client_name.to_string(),
            description: None,
            scopes: vec![],
            grant_types: vec![],
            integration_type: None,
            application_type: None,
            token_endpoint_auth_method: None,
            created: None,
            last_updated: None,
        }
    }

    #[test]
    fn foreign_client_names_are_filtered_out() {
        let records = vec![
            record("op-local-app1"),
            record("someone-elses-client"),
            record("op-local-app2"),
            record("operator-but-not-ours"),
        ];

        let owned = filter_owned(records, "op-local-");
        let names: Vec<_> = owned.iter().map(|r| r.client_name.as_str()).collect();
        assert_eq!(names, vec!["op-local-app1", "op-local-app2"]);
    }

    #[test]
    fn private_jwks_is_rejected_before_upload() {
        let context = Arc::new(OperatorContext {
            service_owner: "microscaler".to_string(),
            environment: "local".to_string(),
            run_id: "test-run".to_string(),
        });
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let crypto = CryptoService::new(context, clock, Box::new(StdRng::seed_from_u64(7)));

        let private = crypto.create_jwks("app1").unwrap();
        assert!(matches!(
            assert_public(&private, "app1"),
            Err(ApiError::PrivateKeyLeak(_))
        ));
        assert!(assert_public(&private.public_only(), "app1").is_ok());
    }

    fn test_client() -> AuthorityClient {
        let context = Arc::new(OperatorContext {
            service_owner: "microscaler".to_string(),
            environment: "local".to_string(),
            run_id: "test-run".to_string(),
        });
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let crypto =
            CryptoService::new(context.clone(), clock.clone(), Box::new(StdRng::seed_from_u64(7)));
        let jwk = crypto.create_jwks("operator").unwrap().keys.remove(0);

        let config = AuthorityApiConfig {
            client_id: "64d8055d-bf0c-4ee2-979e-d2bbe996a9f5".to_string(),
            authority_url: "https://maskinporten.dev".to_string(),
            self_service_url: "https://api.samarbeid.digdir.dev".to_string(),
            jwk: serde_json::to_string(&jwk).unwrap(),
            scope: "idporten:dcr.write".to_string(),
        };

        AuthorityClient::new(config, &context, clock).unwrap()
    }

    #[test]
    fn grant_carries_the_standard_claims() {
        let client = test_client();
        let grant = client.core.create_grant("https://maskinporten.dev/").unwrap();

        // Three dot-separated base64url segments
        assert_eq!(grant.split('.').count(), 3);

        let payload_raw = grant.split('.').nth(1).unwrap();
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload_raw).unwrap()).unwrap();

        assert_eq!(payload["iss"], "64d8055d-bf0c-4ee2-979e-d2bbe996a9f5");
        assert_eq!(payload["aud"], "https://maskinporten.dev/");
        assert_eq!(payload["scope"], "idporten:dcr.write");
        assert_eq!(payload["iat"], payload["nbf"]);
        assert_eq!(
            payload["exp"].as_i64().unwrap() - payload["iat"].as_i64().unwrap(),
            GRANT_LIFETIME_SECS
        );
        assert!(payload["jti"].as_str().is_some());
    }

    #[test]
    fn self_service_paths_join_cleanly() {
        let client = test_client();
        assert_eq!(
            client.core.self_service_path(&["clients", "abc", "jwks"]),
            "https://api.samarbeid.digdir.dev/clients/abc/jwks"
        );
        assert_eq!(
            client.core.authority_path("/token"),
            "https://maskinporten.dev/token"
        );
    }
}
