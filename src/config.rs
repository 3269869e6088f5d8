//! Operator configuration.
//!
//! All values come from the process environment. In the local environment an
//! optional dotenv-style file seeds the environment first, so developers can
//! keep credentials in a `local.env` next to the checkout. Validation happens
//! once at startup; a bad configuration is fatal, never retried.

use crate::constants::DEFAULT_RECONCILE_INTERVAL_SECS;
use crate::context::OperatorContext;
use anyhow::{bail, Context, Result};
use std::path::Path;
use url::Url;

/// Connection settings for the Maskinporten authority and self-service APIs.
#[derive(Debug, Clone)]
pub struct AuthorityApiConfig {
    /// The operator's own OIDC client id, used as `iss` in token grants.
    pub client_id: String,
    /// Base URL of the authority (well-known discovery, token endpoint).
    pub authority_url: String,
    /// Base URL of the self-service client administration API.
    pub self_service_url: String,
    /// JSON of the operator's long-lived signing JWK (private).
    pub jwk: String,
    /// Scope requested in token grants.
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: AuthorityApiConfig,
    pub reconcile_interval_secs: u64,
}

impl Config {
    /// Load configuration from the environment. When `env_file` is given (or
    /// a `local.env` exists in a local environment) it is read into the
    /// process environment first, without overriding variables already set.
    pub fn load(context: &OperatorContext, env_file: Option<&Path>) -> Result<Self> {
        if let Some(path) = env_file {
            if !context.is_local() {
                bail!("config files are only supported in the local environment");
            }
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load env file '{}'", path.display()))?;
        } else if context.is_local() {
            // Best effort; all values may already be in the environment.
            let _ = dotenvy::from_filename("local.env");
        }

        let reconcile_interval_secs = match std::env::var("RECONCILE_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid RECONCILE_INTERVAL_SECS: '{raw}'"))?,
            Err(_) => DEFAULT_RECONCILE_INTERVAL_SECS,
        };

        let config = Self {
            api: AuthorityApiConfig {
                client_id: required("MASKINPORTEN_CLIENT_ID")?,
                authority_url: required("MASKINPORTEN_AUTHORITY_URL")?,
                self_service_url: required("MASKINPORTEN_SELF_SERVICE_URL")?,
                jwk: required("MASKINPORTEN_JWK")?,
                scope: required("MASKINPORTEN_SCOPE")?,
            },
            reconcile_interval_secs,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the operator relies on.
    pub fn validate(&self) -> Result<()> {
        validate_http_url("authority url", &self.api.authority_url)?;
        validate_http_url("self-service url", &self.api.self_service_url)?;

        serde_json::from_str::<serde_json::Value>(&self.api.jwk)
            .context("configured JWK is not valid JSON")?;

        if self.api.client_id.trim().is_empty() {
            bail!("client id must not be empty");
        }
        if self.api.scope.trim().is_empty() {
            bail!("scope must not be empty");
        }
        if self.reconcile_interval_secs == 0 {
            bail!("reconcile interval must be greater than zero");
        }

        Ok(())
    }
}

fn required(key: &str) -> Result<String> {
    let value =
        std::env::var(key).with_context(|| format!("missing required configuration: {key}"))?;
    if value.trim().is_empty() {
        bail!("required configuration is empty: {key}");
    }
    Ok(value)
}

fn validate_http_url(what: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("{what} is not a valid URL: '{raw}'"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{what} must be http(s), got scheme '{other}': '{raw}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            api: AuthorityApiConfig {
                client_id: "64d8055d-bf0c-4ee2-979e-d2bbe996a9f5".to_string(),
                authority_url: "https://maskinporten.dev".to_string(),
                self_service_url: "https://api.samarbeid.digdir.dev".to_string(),
                jwk: r#"{"kty":"RSA","kid":"test.0","n":"AQAB","e":"AQAB"}"#.to_string(),
                scope: "idporten:dcr.write".to_string(),
            },
            reconcile_interval_secs: 600,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_non_http_url() {
        let mut config = valid_config();
        config.api.authority_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config = valid_config();
        config.api.self_service_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_jwk() {
        let mut config = valid_config();
        config.api.jwk = "{not json".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_fields() {
        let mut config = valid_config();
        config.api.scope = "  ".to_string();
        assert!(config.validate().is_err());

        config = valid_config();
        config.reconcile_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
