//! # Maskinporten Operator
//!
//! A Kubernetes operator that manages Maskinporten OIDC clients for apps.
//!
//! ## Overview
//!
//! 1. **Watching MaskinportenClient resources** - across all namespaces
//! 2. **Registering clients** - creates and updates client records at the
//!    Maskinporten self-service API, scoped per app
//! 3. **Key management** - generates RSA signing keys with self-signed
//!    certificates, pushes the public JWKS to the authority, and rotates
//!    certificates before they expire
//! 4. **Secret maintenance** - keeps the private JWKS and client id in the
//!    app's Secret so workloads can sign their own token grants
//! 5. **Finalizer-backed cleanup** - authority records are deleted before
//!    the cluster resource is released

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::runtime::{predicates, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};
use maskinporten_operator::config::Config;
use maskinporten_operator::constants::DEFAULT_METRICS_PORT;
use maskinporten_operator::context::OperatorContext;
use maskinporten_operator::reconciler::Reconciler;
use maskinporten_operator::runtime::Runtime;
use maskinporten_operator::server::{serve, ServerState};
use maskinporten_operator::{metrics, MaskinportenClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maskinporten_operator=info".into()),
        )
        .init();

    info!("Starting Maskinporten Operator");

    metrics::register_metrics()?;

    let context = OperatorContext::discover();
    info!(
        environment = %context.environment,
        run_id = %context.run_id,
        "operator context discovered"
    );

    let env_file = std::env::var("MASKINPORTEN_ENV_FILE").ok().map(PathBuf::from);
    let config = Config::load(&context, env_file.as_deref()).context("failed to load config")?;

    // Start HTTP server for metrics and probes
    let server_state = ServerState::new();
    let server_state_clone = server_state.clone();
    let server_port = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(DEFAULT_METRICS_PORT);

    tokio::spawn(async move {
        if let Err(e) = serve(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default().await?;

    // Watch all namespaces so apps can declare clients wherever they live
    let resources: Api<MaskinportenClient> = Api::all(client.clone());

    let runtime = Arc::new(Runtime::new(config, context)?);
    let reconciler = Arc::new(Reconciler::new(client, runtime));

    server_state.mark_ready();

    // Metadata and status writes do not change the generation, so they do
    // not re-trigger reconcile; time-based rotation runs via requeue-after.
    let (reader, writer) = reflector::store::<MaskinportenClient>();
    let resource_events = reflector(writer, watcher(resources, watcher::Config::default()))
        .default_backoff()
        .touched_objects()
        .predicate_filter(predicates::generation);

    Controller::for_stream(resource_events, reader)
        .shutdown_on_signal()
        .run(
            Reconciler::reconcile,
            Reconciler::error_policy,
            reconciler,
        )
        .for_each(|_| std::future::ready(()))
        .await;

    info!("Operator stopped");

    Ok(())
}
