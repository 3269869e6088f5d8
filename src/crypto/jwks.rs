//! JSON Web Key model shared between the cluster Secret and the authority.
//!
//! Cluster-side keys carry the full RSA private material plus the single
//! X.509 certificate (`x5c`). The authority only ever receives the public
//! half, and the public-only conversion also strips `x5c` since the
//! self-service API rejects it.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("JWKS is empty")]
    Empty,
    #[error("unexpected number of certificates for key '{kid}': {count}")]
    CertificateCount { kid: String, count: usize },
    #[error("invalid key id format: {0}")]
    InvalidKeyId(String),
    #[error("key '{kid}' is missing RSA private fields")]
    MissingPrivateField { kid: String },
    #[error("invalid base64 in JWK field '{field}' of key '{kid}'")]
    InvalidEncoding { kid: String, field: &'static str },
    #[error("invalid certificate in key '{kid}': {reason}")]
    InvalidCertificate { kid: String, reason: String },
    #[error("invalid RSA components in key '{kid}': {reason}")]
    InvalidComponents { kid: String, reason: String },
}

/// A single RSA signing key, RFC 7517 wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    /// Package a generated private key and its DER certificate.
    pub fn from_private_key(key: &RsaPrivateKey, cert_der: &[u8], kid: String) -> Self {
        let primes = key.primes();
        Self {
            kty: "RSA".to_string(),
            kid,
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            n: encode_uint(key.n()),
            e: encode_uint(key.e()),
            d: Some(encode_uint(key.d())),
            p: primes.first().map(encode_uint),
            q: primes.get(1).map(encode_uint),
            dp: None,
            dq: None,
            qi: None,
            x5c: Some(vec![STANDARD.encode(cert_der)]),
        }
    }

    /// Reconstruct the RSA private key from the JWK components.
    pub fn to_private_key(&self) -> Result<RsaPrivateKey, JwksError> {
        let n = self.decode_uint("n", &self.n)?;
        let e = self.decode_uint("e", &self.e)?;
        let d = match &self.d {
            Some(d) => self.decode_uint("d", d)?,
            None => {
                return Err(JwksError::MissingPrivateField {
                    kid: self.kid.clone(),
                })
            }
        };
        let mut primes = Vec::with_capacity(2);
        for (field, value) in [("p", &self.p), ("q", &self.q)] {
            match value {
                Some(raw) => primes.push(self.decode_uint(field, raw)?),
                None => {
                    return Err(JwksError::MissingPrivateField {
                        kid: self.kid.clone(),
                    })
                }
            }
        }

        RsaPrivateKey::from_components(n, e, d, primes).map_err(|err| {
            JwksError::InvalidComponents {
                kid: self.kid.clone(),
                reason: err.to_string(),
            }
        })
    }

    /// The public half of this key, with the certificate chain stripped
    /// (the authority rejects `x5c`).
    pub fn public_only(&self) -> Jwk {
        Jwk {
            kty: self.kty.clone(),
            kid: self.kid.clone(),
            use_: self.use_.clone(),
            alg: self.alg.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            x5c: None,
        }
    }

    pub fn is_public(&self) -> bool {
        self.d.is_none()
            && self.p.is_none()
            && self.q.is_none()
            && self.dp.is_none()
            && self.dq.is_none()
            && self.qi.is_none()
    }

    /// The single DER certificate carried in `x5c`.
    pub fn certificate_der(&self) -> Result<Vec<u8>, JwksError> {
        let chain = self.x5c.as_deref().unwrap_or_default();
        if chain.len() != 1 {
            return Err(JwksError::CertificateCount {
                kid: self.kid.clone(),
                count: chain.len(),
            });
        }
        STANDARD
            .decode(&chain[0])
            .map_err(|_| JwksError::InvalidEncoding {
                kid: self.kid.clone(),
                field: "x5c",
            })
    }

    /// Expiry of this key's certificate.
    pub fn not_after(&self) -> Result<DateTime<Utc>, JwksError> {
        let der = self.certificate_der()?;
        let (_, cert) =
            X509Certificate::from_der(&der).map_err(|err| JwksError::InvalidCertificate {
                kid: self.kid.clone(),
                reason: err.to_string(),
            })?;
        let timestamp = cert.validity().not_after.timestamp();
        DateTime::<Utc>::from_timestamp(timestamp, 0).ok_or_else(|| {
            JwksError::InvalidCertificate {
                kid: self.kid.clone(),
                reason: format!("certificate expiry out of range: {timestamp}"),
            }
        })
    }

    /// The integer suffix after the final `.` in the key id, incremented at
    /// each rotation.
    pub fn rotation_index(&self) -> Result<u32, JwksError> {
        self.kid
            .rsplit('.')
            .next()
            .and_then(|suffix| suffix.parse::<u32>().ok())
            .ok_or_else(|| JwksError::InvalidKeyId(self.kid.clone()))
    }

    fn decode_uint(&self, field: &'static str, raw: &str) -> Result<BigUint, JwksError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| JwksError::InvalidEncoding {
                kid: self.kid.clone(),
                field,
            })?;
        Ok(BigUint::from_bytes_be(&bytes))
    }
}

impl Jwks {
    pub fn public_only(&self) -> Jwks {
        Jwks {
            keys: self.keys.iter().map(Jwk::public_only).collect(),
        }
    }

    pub fn is_public(&self) -> bool {
        self.keys.iter().all(Jwk::is_public)
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys.iter().map(|key| key.kid.clone()).collect()
    }

    /// The key whose certificate expires last. Every key must carry exactly
    /// one certificate.
    pub fn active_key(&self) -> Result<(&Jwk, DateTime<Utc>), JwksError> {
        let mut active: Option<(&Jwk, DateTime<Utc>)> = None;
        for key in &self.keys {
            let not_after = key.not_after()?;
            match active {
                Some((_, current)) if not_after <= current => {}
                _ => active = Some((key, not_after)),
            }
        }
        active.ok_or(JwksError::Empty)
    }
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_jwk(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: kid.to_string(),
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            n: "AQAB".to_string(),
            e: "AQAB".to_string(),
            d: Some("AQAB".to_string()),
            p: Some("AQAB".to_string()),
            q: Some("AQAB".to_string()),
            dp: None,
            dq: None,
            qi: None,
            x5c: Some(vec![STANDARD.encode(b"not-a-real-cert")]),
        }
    }

    #[test]
    fn public_only_strips_private_fields_and_certificates() {
        let public = private_jwk("a.0").public_only();
        assert!(public.is_public());
        assert!(public.x5c.is_none());
        assert_eq!(public.kid, "a.0");
        assert_eq!(public.n, "AQAB");

        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("d").is_none());
        assert!(json.get("p").is_none());
        assert!(json.get("q").is_none());
        assert!(json.get("x5c").is_none());
    }

    #[test]
    fn rotation_index_parses_suffix() {
        assert_eq!(private_jwk("a7b1.0").rotation_index().unwrap(), 0);
        assert_eq!(private_jwk("a7b1.13").rotation_index().unwrap(), 13);
        // uuid-v4 kids contain no other dots, but a dotted prefix still works
        assert_eq!(private_jwk("a.b.2").rotation_index().unwrap(), 2);
    }

    #[test]
    fn rotation_index_rejects_malformed_suffix() {
        assert!(matches!(
            private_jwk("no-suffix").rotation_index(),
            Err(JwksError::InvalidKeyId(_))
        ));
        assert!(matches!(
            private_jwk("a7b1.-1").rotation_index(),
            Err(JwksError::InvalidKeyId(_))
        ));
    }

    #[test]
    fn certificate_count_must_be_one() {
        let mut jwk = private_jwk("a.0");
        jwk.x5c = Some(vec![]);
        assert!(matches!(
            jwk.certificate_der(),
            Err(JwksError::CertificateCount { count: 0, .. })
        ));

        jwk.x5c = Some(vec!["Zm9v".to_string(), "YmFy".to_string()]);
        assert!(matches!(
            jwk.certificate_der(),
            Err(JwksError::CertificateCount { count: 2, .. })
        ));
    }

    #[test]
    fn active_key_on_empty_jwks_fails() {
        let jwks = Jwks { keys: vec![] };
        assert!(matches!(jwks.active_key(), Err(JwksError::Empty)));
    }
}
