//! # Client State Diff Tests
//!
//! Scenario tests for the pure reconciliation diff: from three in-memory
//! projections (declared spec, Secret payload, authority view) to an ordered
//! command list. These cover the full lifecycle: first create, steady state,
//! scope drift, key rotation, deletion, and recovery from an orphaned create.

use chrono::{Duration, TimeZone, Utc};
use maskinporten_operator::authority::models::ClientRecord;
use maskinporten_operator::clock::FixedClock;
use maskinporten_operator::context::OperatorContext;
use maskinporten_operator::crypto::jwks::Jwks;
use maskinporten_operator::crypto::CryptoService;
use maskinporten_operator::secrets::SecretPayload;
use maskinporten_operator::state::{
    AuthorityView, ClientState, Command, DeclaredState, RequestKind,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

const AUTHORITY_URL: &str = "https://maskinporten.dev";

fn fixture() -> (Arc<FixedClock>, CryptoService) {
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let context = Arc::new(OperatorContext {
        service_owner: "microscaler".to_string(),
        environment: "local".to_string(),
        run_id: "test-run".to_string(),
    });
    let crypto = CryptoService::new(context, clock.clone(), Box::new(StdRng::seed_from_u64(1)));
    (clock, crypto)
}

fn declared(scopes: &[&str]) -> DeclaredState {
    DeclaredState {
        app_id: "app1".to_string(),
        client_name: "op-local-app1".to_string(),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        authority_url: AUTHORITY_URL.to_string(),
    }
}

fn record(client_id: &str, scopes: &[&str]) -> ClientRecord {
    ClientRecord {
        client_id: client_id.to_string(),
        client_name: "op-local-app1".to_string(),
        description: None,
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        grant_types: vec!["urn:ietf:params:oauth:grant-type:jwt-bearer".to_string()],
        integration_type: Some("maskinporten".to_string()),
        application_type: Some("web".to_string()),
        token_endpoint_auth_method: Some("private_key_jwt".to_string()),
        created: None,
        last_updated: None,
    }
}

fn payload(client_id: &str, jwks: Jwks) -> SecretPayload {
    SecretPayload {
        client_id: client_id.to_string(),
        authority_url: AUTHORITY_URL.to_string(),
        jwks,
    }
}

/// The steady state S1's commands converge to: record and secret in place,
/// remote JWKS holding the public half of the secret's keys.
fn steady_state(crypto: &CryptoService, scopes: &[&str]) -> (ClientState, Jwks) {
    let jwks = crypto.create_jwks("app1").unwrap();
    let state = ClientState {
        kind: RequestKind::Update,
        declared: declared(scopes),
        secret: Some(payload("assigned-1", jwks.clone())),
        authority: Some(AuthorityView {
            record: record("assigned-1", scopes),
            jwks: Some(jwks.public_only()),
        }),
    };
    (state, jwks)
}

#[test]
fn first_create_registers_client_then_writes_secret() {
    let (_clock, crypto) = fixture();
    let state = ClientState {
        kind: RequestKind::Create,
        declared: declared(&["x:read"]),
        secret: None,
        authority: None,
    };

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 2);

    let Command::CreateClientInApi { request, jwks } = &commands[0] else {
        panic!("expected CreateClientInApi first, got {}", commands[0]);
    };
    assert_eq!(request.client_name, "op-local-app1");
    assert_eq!(request.scopes, vec!["x:read"]);
    assert_eq!(
        request.grant_types,
        vec!["urn:ietf:params:oauth:grant-type:jwt-bearer"]
    );
    assert_eq!(jwks.keys.len(), 1);
    assert!(jwks.keys[0].kid.ends_with(".0"));
    assert!(!jwks.keys[0].is_public());

    let Command::UpdateSecretContent { payload } = &commands[1] else {
        panic!("expected UpdateSecretContent second, got {}", commands[1]);
    };
    // Placeholder until the executor learns the assigned id
    assert!(payload.client_id.is_empty());
    assert_eq!(payload.authority_url, AUTHORITY_URL);
    assert_eq!(payload.jwks, *jwks);
}

#[test]
fn steady_state_produces_no_commands() {
    let (_clock, crypto) = fixture();
    let (state, _) = steady_state(&crypto, &["x:read"]);

    let commands = state.reconcile(&crypto).unwrap();
    assert!(commands.is_empty(), "expected no commands, got {commands:?}");
}

#[test]
fn diff_is_idempotent() {
    let (_clock, crypto) = fixture();
    let (state, _) = steady_state(&crypto, &["x:read"]);

    assert!(state.reconcile(&crypto).unwrap().is_empty());
    assert!(state.reconcile(&crypto).unwrap().is_empty());
}

#[test]
fn scope_change_updates_the_client_only() {
    let (_clock, crypto) = fixture();
    let (mut state, _) = steady_state(&crypto, &["x:read"]);
    state.declared = declared(&["x:read", "y:write"]);

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 1);

    let Command::UpdateClientInApi {
        client_id,
        request,
        jwks,
    } = &commands[0]
    else {
        panic!("expected UpdateClientInApi, got {}", commands[0]);
    };
    assert_eq!(client_id, "assigned-1");
    assert_eq!(request.scopes, vec!["x:read", "y:write"]);
    assert!(jwks.is_none(), "scope drift alone must not touch the JWKS");
}

#[test]
fn rotation_due_pushes_new_public_keys_and_rewrites_secret() {
    let (clock, crypto) = fixture();
    let (state, original_jwks) = steady_state(&crypto, &["x:read"]);

    // NotAfter - 3 days: inside the 7-day rotation window
    clock.advance(Duration::days(27));

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 2);

    let Command::UpdateClientInApi { jwks, .. } = &commands[0] else {
        panic!("expected UpdateClientInApi first, got {}", commands[0]);
    };
    let pushed = jwks.as_ref().expect("rotation must push a JWKS");
    assert_eq!(pushed.keys.len(), 2);
    assert!(pushed.keys[0].kid.ends_with(".1"));
    assert!(pushed.keys[1].kid.ends_with(".0"));
    assert_eq!(pushed.keys[1].kid, original_jwks.keys[0].kid);

    let Command::UpdateSecretContent { payload } = &commands[1] else {
        panic!("expected UpdateSecretContent second, got {}", commands[1]);
    };
    assert_eq!(payload.client_id, "assigned-1");
    assert_eq!(payload.jwks.keys.len(), 2);
    assert_eq!(payload.jwks.key_ids(), pushed.key_ids());
    assert!(!payload.jwks.keys[0].is_public());
}

#[test]
fn pushed_jwks_never_contains_private_material() {
    let (clock, crypto) = fixture();
    let (state, _) = steady_state(&crypto, &["x:read"]);
    clock.advance(Duration::days(27));

    for command in state.reconcile(&crypto).unwrap() {
        if let Command::UpdateClientInApi {
            jwks: Some(jwks), ..
        } = &command
        {
            assert!(jwks.is_public());
            let json = serde_json::to_string(jwks).unwrap();
            assert!(!json.contains("\"d\""));
            assert!(!json.contains("\"x5c\""));
        }
    }
}

#[test]
fn no_rotation_before_the_threshold() {
    let (clock, crypto) = fixture();
    let (state, _) = steady_state(&crypto, &["x:read"]);

    // One second before NotAfter - 7 days
    clock.advance(Duration::days(23) - Duration::seconds(1));
    assert!(state.reconcile(&crypto).unwrap().is_empty());
}

#[test]
fn delete_removes_client_before_secret() {
    let (_clock, crypto) = fixture();
    let (mut state, _) = steady_state(&crypto, &["x:read"]);
    state.kind = RequestKind::Delete;

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 2);
    assert!(
        matches!(&commands[0], Command::DeleteClientInApi { client_id } if client_id == "assigned-1")
    );
    assert!(matches!(&commands[1], Command::DeleteSecretContent));
}

#[test]
fn delete_with_nothing_observed_is_a_no_op() {
    let (_clock, crypto) = fixture();
    let state = ClientState {
        kind: RequestKind::Delete,
        declared: declared(&["x:read"]),
        secret: None,
        authority: None,
    };
    assert!(state.reconcile(&crypto).unwrap().is_empty());
}

#[test]
fn orphaned_create_without_secret_recovers_with_fresh_keys() {
    // Create succeeded at the authority but the JWKS push failed, so the
    // reconcile stopped before the Secret was written. The next pass finds
    // the record by name scan with no JWKS installed.
    let (_clock, crypto) = fixture();
    let state = ClientState {
        kind: RequestKind::Update,
        declared: declared(&["x:read"]),
        secret: None,
        authority: Some(AuthorityView {
            record: record("orphan-1", &["x:read"]),
            jwks: None,
        }),
    };

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 2);

    let Command::UpdateClientInApi {
        client_id, jwks, ..
    } = &commands[0]
    else {
        panic!("expected UpdateClientInApi first, got {}", commands[0]);
    };
    assert_eq!(client_id, "orphan-1");
    let pushed = jwks.as_ref().expect("recovery must push a JWKS");
    assert!(pushed.is_public());

    let Command::UpdateSecretContent { payload } = &commands[1] else {
        panic!("expected UpdateSecretContent second, got {}", commands[1]);
    };
    assert_eq!(payload.client_id, "orphan-1");
    assert_eq!(payload.jwks.public_only(), *pushed);
}

#[test]
fn orphaned_jwks_push_is_completed_from_the_secret() {
    // The record exists and the Secret holds keys, but the remote JWKS was
    // never installed: complete the push without touching the Secret.
    let (_clock, crypto) = fixture();
    let (mut state, jwks) = steady_state(&crypto, &["x:read"]);
    state.authority.as_mut().unwrap().jwks = None;

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 1);

    let Command::UpdateClientInApi { jwks: pushed, .. } = &commands[0] else {
        panic!("expected UpdateClientInApi, got {}", commands[0]);
    };
    assert_eq!(pushed.as_ref().unwrap(), &jwks.public_only());
}

#[test]
fn missing_authority_record_is_recreated_with_existing_keys() {
    // The record vanished at the authority but workloads still hold the
    // Secret: re-register with the same keys instead of invalidating them.
    let (_clock, crypto) = fixture();
    let (mut state, jwks) = steady_state(&crypto, &["x:read"]);
    state.authority = None;

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 2);

    let Command::CreateClientInApi { jwks: create_jwks, .. } = &commands[0] else {
        panic!("expected CreateClientInApi first, got {}", commands[0]);
    };
    assert_eq!(create_jwks, &jwks);

    let Command::UpdateSecretContent { payload } = &commands[1] else {
        panic!("expected UpdateSecretContent second, got {}", commands[1]);
    };
    assert!(payload.client_id.is_empty());
    assert_eq!(payload.jwks, jwks);
}

#[test]
fn lost_secret_with_live_record_mints_fresh_keys() {
    let (_clock, crypto) = fixture();
    let (mut state, old_jwks) = steady_state(&crypto, &["x:read"]);
    state.secret = None;

    let commands = state.reconcile(&crypto).unwrap();
    assert_eq!(commands.len(), 2);

    let Command::UpdateClientInApi { jwks, .. } = &commands[0] else {
        panic!("expected UpdateClientInApi first, got {}", commands[0]);
    };
    let pushed = jwks.as_ref().expect("lost keys must be replaced");
    assert_ne!(pushed.key_ids(), old_jwks.key_ids());

    let Command::UpdateSecretContent { payload } = &commands[1] else {
        panic!("expected UpdateSecretContent second, got {}", commands[1]);
    };
    assert_eq!(payload.client_id, "assigned-1");
    assert_eq!(payload.jwks.public_only(), *pushed);
}

#[test]
fn command_descriptions_are_stable() {
    let (_clock, crypto) = fixture();
    let state = ClientState {
        kind: RequestKind::Create,
        declared: declared(&["x:read"]),
        secret: None,
        authority: None,
    };

    let commands = state.reconcile(&crypto).unwrap();
    let descriptions: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
    assert_eq!(
        descriptions,
        vec!["CreateClientInApi/op-local-app1", "UpdateSecretContent"]
    );
}
