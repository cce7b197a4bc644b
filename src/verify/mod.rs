//! Credential verification strategies.
//!
//! Both strategies implement [`VerificationStrategy`] and never return an
//! error to the caller: every fault is folded into
//! [`VerificationOutcome::Error`] so an ambiguous result can never admit.

pub mod attestation;
pub mod registry;
pub mod scan;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{GatewayConfig, StrategyKind};
use crate::error::Error;

pub use self::attestation::RemoteAttestationClient;
pub use self::registry::{EvmRegistryClient, RegistryClient};
pub use self::scan::{AgentMetadata, OnChainScanner, RegistryEntry, TokenFetch};

/// Terminal result of one verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// The identity holds a valid credential. `credential_id` is the registry
    /// token id when the strategy knows it.
    Verified { credential_id: Option<u64> },
    /// The credential is absent, inactive, or rejected by the service.
    NotVerified { reason: String },
    /// The check itself could not be completed.
    Error { cause: String },
}

impl VerificationOutcome {
    pub fn verified(credential_id: Option<u64>) -> Self {
        Self::Verified { credential_id }
    }

    pub fn not_verified(reason: impl Into<String>) -> Self {
        Self::NotVerified {
            reason: reason.into(),
        }
    }

    pub fn error(cause: impl Into<String>) -> Self {
        Self::Error {
            cause: cause.into(),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Capability shared by every verification backend.
#[async_trait]
pub trait VerificationStrategy: Send + Sync {
    /// Short stable name used in logs.
    fn name(&self) -> &'static str;

    /// Verify that `identity` holds an agent credential.
    async fn verify(&self, identity: &str) -> VerificationOutcome;
}

/// Build the strategy selected by `config.strategy`.
pub fn build_strategy(config: &GatewayConfig) -> Result<Arc<dyn VerificationStrategy>, Error> {
    match config.strategy {
        StrategyKind::RemoteAttestation => {
            let client = RemoteAttestationClient::new(
                &config.attestation_endpoint,
                &config.registry.address,
                config.connect_timeout,
                config.request_timeout,
            )?;
            Ok(Arc::new(client))
        }
        StrategyKind::OnChainScan => {
            let registry = EvmRegistryClient::new(
                &config.registry.rpc_url,
                &config.registry.address,
                config.request_timeout,
            )?;
            Ok(Arc::new(OnChainScanner::new(
                Arc::new(registry),
                config.registry.max_scan_range,
                &config.registry.schema_tag,
            )))
        }
    }
}
