//! Process-wide operator identity: which service owner and environment this
//! operator instance acts on behalf of, plus a per-process run id used to
//! correlate authority requests.

use uuid::Uuid;

/// Environment name used for local development and tests.
pub const ENV_LOCAL: &str = "local";

#[derive(Debug, Clone)]
pub struct OperatorContext {
    /// Organization name stamped into generated certificates.
    pub service_owner: String,
    /// Deployment environment, part of every owned client name.
    pub environment: String,
    /// Unique id for this process, sent as a correlation header.
    pub run_id: String,
}

impl OperatorContext {
    /// Discover the context from the process environment.
    /// Falls back to the local environment when nothing is set.
    pub fn discover() -> Self {
        let environment =
            std::env::var("OPERATOR_ENVIRONMENT").unwrap_or_else(|_| ENV_LOCAL.to_string());
        let service_owner =
            std::env::var("OPERATOR_SERVICE_OWNER").unwrap_or_else(|_| "microscaler".to_string());

        Self {
            service_owner,
            environment,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.environment == ENV_LOCAL
    }

    /// Prefix every owned client name carries at the authority.
    /// Records without it belong to another tenant and are ignored.
    pub fn client_name_prefix(&self) -> String {
        format!("{}-{}-", crate::constants::CLIENT_NAME_PREFIX, self.environment)
    }

    /// Deterministic client name for an app.
    pub fn client_name(&self, app_id: &str) -> String {
        format!("{}{}", self.client_name_prefix(), app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_context() -> OperatorContext {
        OperatorContext {
            service_owner: "microscaler".to_string(),
            environment: ENV_LOCAL.to_string(),
            run_id: "test-run".to_string(),
        }
    }

    #[test]
    fn client_name_is_deterministic() {
        let ctx = local_context();
        assert_eq!(ctx.client_name("app1"), "op-local-app1");
        assert_eq!(ctx.client_name_prefix(), "op-local-");
    }

    #[test]
    fn local_environment_is_detected() {
        let ctx = local_context();
        assert!(ctx.is_local());

        let mut prod = local_context();
        prod.environment = "prod".to_string();
        assert!(!prod.is_local());
        assert_eq!(prod.client_name("app1"), "op-prod-app1");
    }
}
