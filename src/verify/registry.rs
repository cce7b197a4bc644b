//! Read-only client for an ERC-721 style credential registry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::{ContractError, abigen};
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{Address, U256};

use crate::error::RegistryError;

abigen!(
    IdentityRegistry,
    r#"[
        function ownerOf(uint256 tokenId) external view returns (address)
        function tokenURI(uint256 tokenId) external view returns (string)
    ]"#
);

/// Registry reads the scanner needs.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Connection check. Returns the chain id reported by the node.
    async fn chain_id(&self) -> Result<u64, RegistryError>;

    /// `ownerOf(tokenId)`, as a `0x`-prefixed lowercase address.
    async fn owner_of(&self, token_id: u64) -> Result<String, RegistryError>;

    /// `tokenURI(tokenId)`.
    async fn token_uri(&self, token_id: u64) -> Result<String, RegistryError>;
}

/// Registry client backed by `eth_call` against a JSON-RPC node.
pub struct EvmRegistryClient {
    provider: Arc<Provider<Http>>,
    registry: IdentityRegistry<Provider<Http>>,
    request_timeout: Duration,
}

impl EvmRegistryClient {
    pub fn new(
        rpc_url: &str,
        contract: &str,
        request_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| RegistryError::ClientInit(format!("invalid RPC URL {rpc_url}: {e}")))?;
        let address: Address = contract.parse().map_err(|e| {
            RegistryError::ClientInit(format!("invalid registry address {contract}: {e}"))
        })?;

        let provider = Arc::new(provider);
        let registry = IdentityRegistry::new(address, provider.clone());
        Ok(Self {
            provider,
            registry,
            request_timeout,
        })
    }

    /// Bound one node round trip by the request timeout.
    async fn within<T>(
        &self,
        method: &'static str,
        call: impl Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, RegistryError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| RegistryError::Timeout {
                method: method.to_string(),
                timeout: self.request_timeout,
            })?
    }
}

#[async_trait]
impl RegistryClient for EvmRegistryClient {
    async fn chain_id(&self) -> Result<u64, RegistryError> {
        let id = self
            .within("eth_chainId", async {
                self.provider
                    .get_chainid()
                    .await
                    .map_err(|e| provider_error("eth_chainId", e))
            })
            .await?;
        if id > U256::from(u64::MAX) {
            return Err(RegistryError::Decode {
                what: "chain id",
                reason: format!("{id} does not fit in 64 bits"),
            });
        }
        Ok(id.as_u64())
    }

    async fn owner_of(&self, token_id: u64) -> Result<String, RegistryError> {
        let call = self.registry.owner_of(U256::from(token_id));
        let owner = self
            .within("ownerOf", async {
                call.call().await.map_err(|e| contract_error("ownerOf", e))
            })
            .await?;
        Ok(format!("{owner:?}"))
    }

    async fn token_uri(&self, token_id: u64) -> Result<String, RegistryError> {
        let call = self.registry.token_uri(U256::from(token_id));
        self.within("tokenURI", async {
            call.call().await.map_err(|e| contract_error("tokenURI", e))
        })
        .await
    }
}

fn provider_error(method: &str, error: ProviderError) -> RegistryError {
    match error.as_error_response() {
        Some(rpc) => RegistryError::Rpc {
            method: method.to_string(),
            code: rpc.code,
            message: rpc.message.clone(),
        },
        None => RegistryError::Transport {
            method: method.to_string(),
            reason: error.to_string(),
        },
    }
}

fn contract_error(method: &'static str, error: ContractError<Provider<Http>>) -> RegistryError {
    match error {
        ContractError::Revert(_) => RegistryError::Reverted {
            method: method.to_string(),
        },
        ContractError::MiddlewareError { e } | ContractError::ProviderError { e } => {
            provider_error(method, e)
        }
        other => RegistryError::Decode {
            what: method,
            reason: other.to_string(),
        },
    }
}
