//! # Reconciler
//!
//! Core reconciliation logic for `MaskinportenClient` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Map the request: derive `(app-id, app-label)` from the resource
//! 2. Classify as Create / Update / Delete from deletion timestamp + finalizer;
//!    a Create installs the finalizer and stamps status `recorded` first
//! 3. Fetch current state: the label-selected Secret and the authority's
//!    record (by client id from the Secret, falling back to a name scan)
//! 4. Diff declared vs observed state into a command list (pure, no I/O)
//! 5. Execute the commands in order, recording the executed prefix on failure
//! 6. Fold the outcome into status; a Delete releases the finalizer last
//! 7. Requeue after the configured interval with +/-10% jitter so fleet-wide
//!    certificate rotation stays decorrelated

use crate::authority::error::ApiError;
use crate::constants::{
    APP_LABEL_KEY, ERROR_REQUEUE_SECS, FINALIZER, REQUEUE_JITTER_FRACTION, SECRET_DATA_KEY,
};
use crate::metrics;
use crate::runtime::Runtime;
use crate::secrets::{self, SecretPayload};
use crate::state::{AuthorityView, ClientState, Command, DeclaredState, RequestKind};
use crate::{MaskinportenClient, MaskinportenClientStatus};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, Resource, ResourceExt};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

pub struct Reconciler {
    client: Client,
    runtime: Arc<Runtime>,
}

/// State threaded through command execution: the create callback stashes the
/// authority-assigned client id here so later commands can pick it up.
#[derive(Debug, Default)]
struct ExecOutcome {
    assigned_client_id: Option<String>,
    written_payload: Option<SecretPayload>,
}

impl Reconciler {
    pub fn new(client: Client, runtime: Arc<Runtime>) -> Self {
        Self { client, runtime }
    }

    pub async fn reconcile(
        resource: Arc<MaskinportenClient>,
        ctx: Arc<Reconciler>,
    ) -> Result<Action, ReconcilerError> {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = ctx.reconcile_inner(&resource).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        result.map_err(|err| {
            metrics::increment_reconciliation_errors();
            ReconcilerError::ReconciliationFailed(err)
        })
    }

    pub fn error_policy(
        resource: Arc<MaskinportenClient>,
        error: &ReconcilerError,
        _ctx: Arc<Reconciler>,
    ) -> Action {
        error!(
            name = %resource.name_any(),
            error = %error,
            "reconciliation failed, requeueing"
        );
        Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
    }

    async fn reconcile_inner(&self, resource: &MaskinportenClient) -> Result<Action> {
        let name = resource.name_any();
        let namespace = resource
            .namespace()
            .context("MaskinportenClient has no namespace")?;

        // Request mapping is deterministic and does no I/O.
        let app_id = name.clone();
        let app_label = resource
            .spec
            .app_label
            .clone()
            .unwrap_or_else(|| name.clone());
        let kind = classify(resource);

        info!(%namespace, %name, request_kind = %kind, "reconciling MaskinportenClient");

        let api: Api<MaskinportenClient> = Api::namespaced(self.client.clone(), &namespace);

        if kind == RequestKind::Create {
            // The finalizer must be persisted before any remote creation so
            // cluster deletion always blocks until authority cleanup ran.
            self.add_finalizer(&api, resource).await?;
            self.patch_status(
                &api,
                &name,
                serde_json::json!({
                    "state": "recorded",
                    "reason": "",
                    "lastSynced": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        }

        let declared = DeclaredState {
            app_id: app_id.clone(),
            client_name: self.runtime.context().client_name(&app_id),
            scopes: resource.spec.scopes.clone(),
            authority_url: self.runtime.config().api.authority_url.clone(),
        };

        let secret = self.find_app_secret(&namespace, &app_label).await?;
        let payload = match &secret {
            Some(secret) => {
                secrets::check_secret_type(secret)?;
                secrets::payload_from_secret(secret)?
            }
            None => None,
        };

        let authority = self.fetch_authority_view(&declared, payload.as_ref()).await?;

        let state = ClientState {
            kind,
            declared,
            secret: payload,
            authority,
        };
        let commands = state.reconcile(self.runtime.crypto())?;

        if kind == RequestKind::Delete {
            let (executed, _) = self
                .run_commands(&api, &name, &namespace, &app_label, &secret, &commands)
                .await?;
            self.patch_status(
                &api,
                &name,
                serde_json::json!({
                    "state": "reconciled",
                    "reason": format!("Reconciled {} resources", executed.len()),
                    "lastActions": executed,
                    "lastSynced": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
            self.remove_finalizer(&api, &name).await?;
            info!(%name, "MaskinportenClient deleted, finalizer released");
            return Ok(Action::await_change());
        }

        if commands.is_empty() {
            info!(%name, "no actions taken");
            self.patch_status(
                &api,
                &name,
                serde_json::json!({
                    "state": "reconciled",
                    "observedGeneration": resource.meta().generation,
                    "lastSynced": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
            return Ok(Action::requeue(self.jittered_interval()));
        }

        let (executed, outcome) = self
            .run_commands(&api, &name, &namespace, &app_label, &secret, &commands)
            .await?;

        let status = self.success_status(resource, &state, &executed, &outcome);
        self.patch_status(&api, &name, serde_json::to_value(&status)?)
            .await?;

        info!(%name, actions = executed.len(), "reconciled MaskinportenClient");
        Ok(Action::requeue(self.jittered_interval()))
    }

    /// Execute commands left to right. On failure the already-executed
    /// prefix is recorded in status with `state=error` before the error
    /// propagates to the controller for requeue.
    async fn run_commands(
        &self,
        api: &Api<MaskinportenClient>,
        name: &str,
        namespace: &str,
        app_label: &str,
        secret: &Option<Secret>,
        commands: &[Command],
    ) -> Result<(Vec<String>, ExecOutcome)> {
        let mut executed = Vec::with_capacity(commands.len());
        let mut outcome = ExecOutcome::default();

        for command in commands {
            match self
                .execute_command(command, namespace, app_label, name, secret, &mut outcome)
                .await
            {
                Ok(()) => {
                    metrics::increment_commands_executed(1);
                    executed.push(command.to_string());
                }
                Err(err) => {
                    warn!(%name, command = %command, error = format!("{err:#}"), "command failed");
                    // An orphaned create gets a distinct tag: the record now
                    // exists at the authority without keys, and the next pass
                    // recovers it via name scan.
                    let reason = match err.downcast_ref::<ApiError>() {
                        Some(api_err) if api_err.is_post_create_orphan() => {
                            format!("post-create-orphan: {err:#}")
                        }
                        _ => format!("{err:#}"),
                    };
                    let _ = self
                        .patch_status(
                            api,
                            name,
                            serde_json::json!({
                                "state": "error",
                                "reason": reason,
                                "lastActions": executed,
                                "lastSynced": Utc::now().to_rfc3339(),
                            }),
                        )
                        .await;
                    return Err(err.context(format!("command '{command}' failed")));
                }
            }
        }

        Ok((executed, outcome))
    }

    async fn execute_command(
        &self,
        command: &Command,
        namespace: &str,
        app_label: &str,
        resource_name: &str,
        secret: &Option<Secret>,
        outcome: &mut ExecOutcome,
    ) -> Result<()> {
        let authority = self.runtime.authority();

        match command {
            Command::CreateClientInApi { request, jwks } => {
                let record = authority.create_client(request, &jwks.public_only()).await?;
                info!(client_id = %record.client_id, client_name = %request.client_name, "created client at authority");
                outcome.assigned_client_id = Some(record.client_id);
            }
            Command::UpdateClientInApi {
                client_id,
                request,
                jwks,
            } => {
                authority.update_client(client_id, request).await?;
                if let Some(public) = jwks {
                    authority.create_client_jwks(client_id, public).await?;
                }
            }
            Command::DeleteClientInApi { client_id } => {
                authority.delete_client(client_id).await?;
                info!(%client_id, "deleted client at authority");
            }
            Command::UpdateSecretContent { payload } => {
                let mut payload = payload.clone();
                if payload.client_id.is_empty() {
                    payload.client_id = outcome
                        .assigned_client_id
                        .clone()
                        .context("refusing to write secret payload without a client id")?;
                }
                self.write_secret_payload(namespace, app_label, resource_name, secret, &payload)
                    .await?;
                outcome.written_payload = Some(payload);
            }
            Command::DeleteSecretContent => {
                if let Some(secret) = secret {
                    self.remove_secret_payload(namespace, secret).await?;
                }
            }
        }

        Ok(())
    }

    fn success_status(
        &self,
        resource: &MaskinportenClient,
        state: &ClientState,
        executed: &[String],
        outcome: &ExecOutcome,
    ) -> MaskinportenClientStatus {
        let payload = outcome.written_payload.as_ref().or(state.secret.as_ref());

        let client_id = payload
            .map(|p| p.client_id.clone())
            .or_else(|| outcome.assigned_client_id.clone())
            .or_else(|| {
                state
                    .authority
                    .as_ref()
                    .map(|view| view.record.client_id.clone())
            });

        let key_ids = payload.map(|p| p.jwks.key_ids()).unwrap_or_default();

        MaskinportenClientStatus {
            state: Some("reconciled".to_string()),
            reason: Some(format!("Reconciled {} resources", executed.len())),
            observed_generation: resource.meta().generation,
            last_synced: Some(Utc::now().to_rfc3339()),
            last_actions: executed.to_vec(),
            client_id,
            authority: Some(self.runtime.config().api.authority_url.clone()),
            key_ids,
        }
    }

    /// List Secrets by the app label selector; the operator expects at most
    /// one match per app.
    async fn find_app_secret(&self, namespace: &str, app_label: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{APP_LABEL_KEY}={app_label}");
        let list = api
            .list(&ListParams::default().labels(&selector))
            .await
            .with_context(|| format!("failed to list secrets with selector '{selector}'"))?;

        let mut items = list.items;
        match items.len() {
            0 => Ok(None),
            1 => Ok(Some(items.remove(0))),
            n => bail!("unexpected number of secrets found: {n}"),
        }
    }

    /// The authority's view, looked up by the client id stored in the Secret
    /// when available, falling back to a scan by deterministic client name.
    async fn fetch_authority_view(
        &self,
        declared: &DeclaredState,
        payload: Option<&SecretPayload>,
    ) -> Result<Option<AuthorityView>> {
        let authority = self.runtime.authority();

        if let Some(payload) = payload {
            if !payload.client_id.is_empty() {
                if let Some((record, jwks)) = authority.get_client(&payload.client_id).await? {
                    return Ok(Some(AuthorityView { record, jwks }));
                }
                // 404 for the stored id: fall through to the name scan in
                // case the record was re-created under a different id.
            }
        }

        let Some(record) = authority.find_client_by_name(&declared.client_name).await? else {
            return Ok(None);
        };
        match authority.get_client(&record.client_id).await? {
            Some((record, jwks)) => Ok(Some(AuthorityView { record, jwks })),
            None => Ok(None),
        }
    }

    async fn write_secret_payload(
        &self,
        namespace: &str,
        app_label: &str,
        resource_name: &str,
        existing: &Option<Secret>,
        payload: &SecretPayload,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        match existing {
            Some(secret) => {
                let secret_name = secret.name_any();
                let json = String::from_utf8(payload.to_bytes()?)
                    .context("payload is not valid UTF-8")?;
                let patch = serde_json::json!({ "stringData": { SECRET_DATA_KEY: json } });
                api.patch(&secret_name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .with_context(|| format!("failed to update secret '{secret_name}'"))?;
            }
            None => {
                let secret = secrets::build_secret(resource_name, namespace, app_label, payload)?;
                api.create(&PostParams::default(), &secret)
                    .await
                    .with_context(|| format!("failed to create secret '{resource_name}'"))?;
            }
        }

        Ok(())
    }

    /// Remove only the operator's entry; the Secret object stays with the
    /// workload.
    async fn remove_secret_payload(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let has_entry = secret
            .data
            .as_ref()
            .is_some_and(|data| data.contains_key(SECRET_DATA_KEY));
        if !has_entry {
            return Ok(());
        }

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret_name = secret.name_any();
        let patch = serde_json::json!({ "data": { SECRET_DATA_KEY: serde_json::Value::Null } });
        api.patch(&secret_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to remove payload from secret '{secret_name}'"))?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        api: &Api<MaskinportenClient>,
        resource: &MaskinportenClient,
    ) -> Result<()> {
        let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(
            &resource.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .context("failed to add finalizer")?;
        Ok(())
    }

    async fn remove_finalizer(&self, api: &Api<MaskinportenClient>, name: &str) -> Result<()> {
        let resource = api
            .get(name)
            .await
            .context("failed to refetch resource for finalizer removal")?;
        let finalizers: Vec<String> = resource
            .meta()
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != FINALIZER)
            .collect();

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .context("failed to remove finalizer")?;
        Ok(())
    }

    async fn patch_status(
        &self,
        api: &Api<MaskinportenClient>,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        api.patch_status(
            name,
            &PatchParams::apply("maskinporten-operator"),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await
        .with_context(|| format!("failed to update status of '{name}'"))?;
        Ok(())
    }

    /// The configured interval randomized by +/-10% so a fleet of operators
    /// created at the same time does not rotate certificates in lockstep.
    fn jittered_interval(&self) -> Duration {
        let base = self.runtime.config().reconcile_interval_secs as f64;
        let factor =
            1.0 + rand::thread_rng().gen_range(-REQUEUE_JITTER_FRACTION..=REQUEUE_JITTER_FRACTION);
        Duration::from_secs_f64((base * factor).max(1.0))
    }
}

/// Classify the request from deletion timestamp and finalizer presence.
fn classify(resource: &MaskinportenClient) -> RequestKind {
    if resource.meta().deletion_timestamp.is_some() {
        RequestKind::Delete
    } else if resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == FINALIZER))
    {
        RequestKind::Update
    } else {
        RequestKind::Create
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MaskinportenClientSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn resource() -> MaskinportenClient {
        MaskinportenClient::new(
            "app1",
            MaskinportenClientSpec {
                scopes: vec!["x:read".to_string()],
                app_label: None,
            },
        )
    }

    #[test]
    fn fresh_resource_classifies_as_create() {
        assert_eq!(classify(&resource()), RequestKind::Create);
    }

    #[test]
    fn finalized_resource_classifies_as_update() {
        let mut resource = resource();
        resource.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        assert_eq!(classify(&resource), RequestKind::Update);
    }

    #[test]
    fn foreign_finalizer_still_classifies_as_create() {
        let mut resource = resource();
        resource.metadata.finalizers = Some(vec!["someone.else/finalizer".to_string()]);
        assert_eq!(classify(&resource), RequestKind::Create);
    }

    #[test]
    fn deleting_resource_classifies_as_delete() {
        let mut resource = resource();
        resource.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        resource.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert_eq!(classify(&resource), RequestKind::Delete);
    }
}
