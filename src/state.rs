//! Pure reconciliation diff.
//!
//! `ClientState` aggregates the three observed projections of one app (the
//! declared spec, the Secret payload, and the authority's view) and turns
//! them into an ordered list of idempotent commands. No I/O happens here;
//! the reconciler executes the commands and owns every side effect, which
//! keeps this logic unit-testable with three in-memory inputs.

use crate::authority::models::{ClientRecord, ClientRequest};
use crate::crypto::jwks::{Jwks, JwksError};
use crate::crypto::CryptoService;
use crate::secrets::SecretPayload;
use std::fmt;
use thiserror::Error;

/// How the reconciler classified the incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// First reconcile: no finalizer yet, no deletion timestamp.
    Create,
    /// Finalizer present, no deletion timestamp.
    Update,
    /// Deletion timestamp set.
    Delete,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Create => write!(f, "Create"),
            RequestKind::Update => write!(f, "Update"),
            RequestKind::Delete => write!(f, "Delete"),
        }
    }
}

/// What the spec says the world should look like.
#[derive(Debug, Clone)]
pub struct DeclaredState {
    pub app_id: String,
    /// Deterministic `<prefix>-<environment>-<app-id>` name at the authority.
    pub client_name: String,
    pub scopes: Vec<String>,
    pub authority_url: String,
}

/// The authority's view of this app, when a record was found.
#[derive(Debug, Clone)]
pub struct AuthorityView {
    pub record: ClientRecord,
    /// Public-only JWKS installed at the authority; `None` when the record
    /// exists but no JWKS was ever pushed (an orphaned create).
    pub jwks: Option<Jwks>,
}

/// The three projections the diff runs over.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub kind: RequestKind,
    pub declared: DeclaredState,
    pub secret: Option<SecretPayload>,
    pub authority: Option<AuthorityView>,
}

/// One idempotent side effect, executed left to right by the reconciler.
#[derive(Debug, Clone)]
pub enum Command {
    /// Register the client at the authority and install its public JWKS.
    /// Carries the full private JWKS; the executor pushes the public half
    /// and learns the assigned client id.
    CreateClientInApi { request: ClientRequest, jwks: Jwks },
    /// Update the authority record; `jwks` carries a public-only key set to
    /// (re)install when keys rotated or the previous push never landed.
    UpdateClientInApi {
        client_id: String,
        request: ClientRequest,
        jwks: Option<Jwks>,
    },
    DeleteClientInApi { client_id: String },
    /// Write the operator's payload entry into the app Secret. An empty
    /// client id is a placeholder the executor fills from the create result.
    UpdateSecretContent { payload: SecretPayload },
    /// Remove the operator's payload entry, leaving the Secret object to the
    /// workload.
    DeleteSecretContent,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CreateClientInApi { request, .. } => {
                write!(f, "CreateClientInApi/{}", request.client_name)
            }
            Command::UpdateClientInApi {
                client_id, jwks, ..
            } => {
                if jwks.is_some() {
                    write!(f, "UpdateClientInApi/{client_id}+jwks")
                } else {
                    write!(f, "UpdateClientInApi/{client_id}")
                }
            }
            Command::DeleteClientInApi { client_id } => {
                write!(f, "DeleteClientInApi/{client_id}")
            }
            Command::UpdateSecretContent { .. } => write!(f, "UpdateSecretContent"),
            Command::DeleteSecretContent => write!(f, "DeleteSecretContent"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("authority record is missing a client id")]
    MissingClientId,
    #[error(transparent)]
    Jwks(#[from] JwksError),
    #[error("crypto failure: {0}")]
    Crypto(anyhow::Error),
}

impl ClientState {
    /// Diff declared against observed state into an ordered command list.
    /// An empty list means the world already matches the spec.
    pub fn reconcile(&self, crypto: &CryptoService) -> Result<Vec<Command>, StateError> {
        match self.kind {
            RequestKind::Create => self.plan_create(crypto),
            RequestKind::Update => self.plan_update(crypto),
            RequestKind::Delete => Ok(self.plan_delete()),
        }
    }

    fn client_request(&self) -> ClientRequest {
        ClientRequest::machine_client(self.declared.client_name.clone(), self.declared.scopes.clone())
    }

    fn expected_payload(&self, client_id: String, jwks: Jwks) -> SecretPayload {
        SecretPayload {
            client_id,
            authority_url: self.declared.authority_url.clone(),
            jwks,
        }
    }

    fn plan_create(&self, crypto: &CryptoService) -> Result<Vec<Command>, StateError> {
        let jwks = crypto
            .create_jwks(&self.declared.app_id)
            .map_err(StateError::Crypto)?;

        Ok(vec![
            Command::CreateClientInApi {
                request: self.client_request(),
                jwks: jwks.clone(),
            },
            Command::UpdateSecretContent {
                payload: self.expected_payload(String::new(), jwks),
            },
        ])
    }

    fn plan_update(&self, crypto: &CryptoService) -> Result<Vec<Command>, StateError> {
        let Some(view) = &self.authority else {
            // Record lost or never created. Reuse the keys the workload
            // already holds when we have them; mint fresh ones otherwise.
            let jwks = match &self.secret {
                Some(payload) => payload.jwks.clone(),
                None => crypto
                    .create_jwks(&self.declared.app_id)
                    .map_err(StateError::Crypto)?,
            };
            return Ok(vec![
                Command::CreateClientInApi {
                    request: self.client_request(),
                    jwks: jwks.clone(),
                },
                Command::UpdateSecretContent {
                    payload: self.expected_payload(String::new(), jwks),
                },
            ]);
        };

        if view.record.client_id.is_empty() {
            return Err(StateError::MissingClientId);
        }
        let client_id = view.record.client_id.clone();
        let mut commands = Vec::new();

        // The Secret holds the rotation source of truth. A lost Secret means
        // the private key is unrecoverable, so new keys must be minted.
        let mut push_public: Option<Jwks> = None;
        let payload_jwks = match &self.secret {
            Some(payload) => {
                match crypto
                    .rotate_if_needed(&self.declared.app_id, &payload.jwks)
                    .map_err(StateError::Crypto)?
                {
                    Some(rotated) => {
                        push_public = Some(rotated.public_only());
                        rotated
                    }
                    None => {
                        let remote_jwks_missing =
                            view.jwks.as_ref().is_none_or(|jwks| jwks.keys.is_empty());
                        if remote_jwks_missing {
                            // Completes the push after a post-create orphan.
                            push_public = Some(payload.jwks.public_only());
                        }
                        payload.jwks.clone()
                    }
                }
            }
            None => {
                let fresh = crypto
                    .create_jwks(&self.declared.app_id)
                    .map_err(StateError::Crypto)?;
                push_public = Some(fresh.public_only());
                fresh
            }
        };

        let record_drifted = view.record.scopes != self.declared.scopes
            || view.record.client_name != self.declared.client_name;
        if record_drifted || push_public.is_some() {
            commands.push(Command::UpdateClientInApi {
                client_id: client_id.clone(),
                request: self.client_request(),
                jwks: push_public,
            });
        }

        let expected = self.expected_payload(client_id, payload_jwks);
        if self.secret.as_ref() != Some(&expected) {
            commands.push(Command::UpdateSecretContent { payload: expected });
        }

        Ok(commands)
    }

    /// Authority deletion first, then the secret entry: a workload must not
    /// briefly hold credentials for a record that is about to disappear.
    fn plan_delete(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if let Some(view) = &self.authority {
            commands.push(Command::DeleteClientInApi {
                client_id: view.record.client_id.clone(),
            });
        }
        if self.secret.is_some() {
            commands.push(Command::DeleteSecretContent);
        }
        commands
    }
}
