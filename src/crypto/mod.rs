//! Key and certificate generation for Maskinporten clients.
//!
//! The authority only accepts RS256 with 2048-bit RSA keys, so that is the
//! only shape this service produces. Both the clock and the randomness source
//! are injected; everything else is pure, which keeps rotation timing and key
//! packaging fully deterministic under test.

pub mod jwks;

use crate::clock::Clock;
use crate::constants::{CERT_ROTATION_THRESHOLD_DAYS, CERT_VALIDITY_DAYS};
use crate::context::OperatorContext;
use anyhow::{Context as _, Result};
use chrono::Duration;
use jwks::{Jwk, Jwks, JwksError};
use rand_core::{CryptoRngCore, RngCore as _};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey as _;
use rsa::RsaPrivateKey;
use std::sync::{Arc, Mutex};
use x509_parser::prelude::*;

pub struct CryptoService {
    context: Arc<OperatorContext>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn CryptoRngCore + Send>>,
}

impl CryptoService {
    pub fn new(
        context: Arc<OperatorContext>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn CryptoRngCore + Send>,
    ) -> Self {
        Self {
            context,
            clock,
            rng: Mutex::new(rng),
        }
    }

    /// The initial JWKS for a new app: one fresh key at rotation index 0.
    pub fn create_jwks(&self, app_id: &str) -> Result<Jwks> {
        let (key, cert_der) = self.create_cert(app_id)?;
        Ok(Jwks {
            keys: vec![self.package_key(&key, &cert_der, 0)],
        })
    }

    /// Rotate the active key if its certificate expires within the rotation
    /// window. Returns `None` when no rotation is due.
    ///
    /// The rotated JWKS is `[new, active]`: the new key leads, and the
    /// previously active key is retained for one rotation so workloads
    /// holding an older copy keep signing until their next fetch. Older
    /// non-active keys are dropped.
    pub fn rotate_if_needed(&self, app_id: &str, current: &Jwks) -> Result<Option<Jwks>> {
        if current.keys.is_empty() {
            return Err(JwksError::Empty.into());
        }
        // Validates the one-certificate-per-key invariant across all keys.
        for key in &current.keys {
            key.certificate_der()?;
        }

        let (active, not_after) = current.active_key()?;
        let threshold = self.clock.now_utc() + Duration::days(CERT_ROTATION_THRESHOLD_DAYS);
        if not_after > threshold {
            return Ok(None);
        }

        let next_index = active
            .rotation_index()?
            .checked_add(1)
            .context("rotation index overflow")?;
        let (key, cert_der) = self.create_cert(app_id)?;
        let keys = vec![self.package_key(&key, &cert_der, next_index), active.clone()];
        Ok(Some(Jwks { keys }))
    }

    fn package_key(&self, key: &RsaPrivateKey, cert_der: &[u8], index: u32) -> Jwk {
        let kid = format!("{}.{}", self.random_uuid(), index);
        Jwk::from_private_key(key, cert_der, kid)
    }

    fn random_uuid(&self) -> uuid::Uuid {
        let mut bytes = [0u8; 16];
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    fn create_cert(&self, app_id: &str) -> Result<(RsaPrivateKey, Vec<u8>)> {
        let rsa_key = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            RsaPrivateKey::new(&mut **rng, 2048).context("error generating RSA key for JWKS")?
        };

        let pkcs8 = rsa_key
            .to_pkcs8_der()
            .context("error encoding RSA key for signing")?;
        let key_pair = KeyPair::try_from(pkcs8.as_bytes())
            .context("error loading RSA key into certificate builder")?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(app_id.to_string()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(self.context.service_owner.clone()),
        );
        params.distinguished_name = dn;

        params.serial_number = Some(self.random_serial());
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let now = self.clock.now_utc();
        let not_before = ::time::OffsetDateTime::from_unix_timestamp(now.timestamp())
            .context("clock out of certificate range")?;
        params.not_before = not_before;
        params.not_after = not_before + ::time::Duration::days(CERT_VALIDITY_DAYS);

        let cert = params
            .self_signed(&key_pair)
            .context("error generating certificate for JWKS")?;
        let der = cert.der().to_vec();

        // Round-trip through the parser so a malformed certificate can never
        // end up inside a Secret.
        X509Certificate::from_der(&der)
            .map_err(|err| anyhow::anyhow!("error parsing generated certificate: {err}"))?;

        Ok((rsa_key, der))
    }

    /// X.509 serials are up to 20-byte unsigned integers; 16 random bytes
    /// (128 bits) is unique enough, matching UUID v4's 122 bits.
    fn random_serial(&self) -> SerialNumber {
        let mut bytes = [0u8; 16];
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.fill_bytes(&mut bytes);
        SerialNumber::from(bytes.to_vec())
    }
}
