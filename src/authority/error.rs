//! Error taxonomy for authority traffic, split by handling policy rather
//! than wire type: transport failures and 5xx are retried by the client,
//! 4xx surfaces with the response body, and a post-create JWKS failure gets
//! its own kind because the freshly created record is now orphaned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code {status} from {url}, body:\n{body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("retry budget exhausted for {url}")]
    RetriesExhausted {
        url: String,
        #[source]
        source: Box<ApiError>,
    },

    #[error("created client '{client_id}' but failed to install its JWKS")]
    PostCreateOrphan {
        client_id: String,
        #[source]
        source: Box<ApiError>,
    },

    #[error("client name '{0}' does not carry the operator prefix")]
    ForeignClient(String),

    #[error("refusing to upload private key material in JWKS for client '{0}'")]
    PrivateKeyLeak(String),

    #[error("invalid operator JWK in configuration: {0}")]
    InvalidJwk(String),

    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("{0}")]
    Invalid(String),
}

impl ApiError {
    /// True when a create succeeded but the JWKS push did not, leaving a
    /// record at the authority with no usable keys. The reconciler tags the
    /// resource status with this kind so the recovery path is visible.
    pub fn is_post_create_orphan(&self) -> bool {
        matches!(self, ApiError::PostCreateOrphan { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_kind_is_detected_through_anyhow() {
        let orphan = ApiError::PostCreateOrphan {
            client_id: "orphan-1".to_string(),
            source: Box::new(ApiError::Status {
                url: "https://api.example/clients/orphan-1/jwks".to_string(),
                status: 500,
                body: String::new(),
            }),
        };
        assert!(orphan.is_post_create_orphan());

        // The reconciler sees commands fail as anyhow errors and downcasts
        let wrapped: anyhow::Error = orphan.into();
        assert!(wrapped
            .downcast_ref::<ApiError>()
            .is_some_and(ApiError::is_post_create_orphan));

        let plain = ApiError::Invalid("nope".to_string());
        assert!(!plain.is_post_create_orphan());
    }
}
