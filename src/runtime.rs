//! Composition root: wires configuration, operator identity, crypto and the
//! authority client together for the reconcile loop (and the CLI).

use crate::authority::AuthorityClient;
use crate::clock;
use crate::config::Config;
use crate::context::OperatorContext;
use crate::crypto::CryptoService;
use anyhow::{Context as _, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

pub struct Runtime {
    config: Config,
    context: Arc<OperatorContext>,
    crypto: CryptoService,
    authority: AuthorityClient,
}

impl Runtime {
    pub fn new(config: Config, context: OperatorContext) -> Result<Self> {
        let context = Arc::new(context);
        let clock = clock::system();

        let crypto = CryptoService::new(
            context.clone(),
            clock.clone(),
            Box::new(StdRng::from_entropy()),
        );
        let authority = AuthorityClient::new(config.api.clone(), &context, clock)
            .context("failed to build authority client")?;

        Ok(Self {
            config,
            context,
            crypto,
            authority,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &OperatorContext {
        &self.context
    }

    pub fn crypto(&self) -> &CryptoService {
        &self.crypto
    }

    pub fn authority(&self) -> &AuthorityClient {
        &self.authority
    }
}
