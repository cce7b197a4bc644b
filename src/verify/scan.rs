//! Linear scan of the credential registry.
//!
//! The scanner walks token ids `1..=max_scan_range` in ascending order and
//! returns the first token whose metadata names the identity. Each token is
//! fetched independently; a token that cannot be read is skipped rather than
//! failing the scan.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::registry::RegistryClient;
use super::{VerificationOutcome, VerificationStrategy};
use crate::config::NULL_ADDRESS;

const INLINE_JSON_PREFIX: &str = "data:application/json;base64,";

/// One allocated registry token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub token_id: u64,
    pub owner: String,
    pub metadata_uri: String,
}

/// Per-token result consumed by the scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFetch {
    Found(RegistryEntry),
    Unallocated,
    FetchFailed(String),
}

/// Decoded agent-credential document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentMetadata {
    pub display_name: Option<String>,
    pub schema_tag: Option<String>,
    pub active: bool,
    /// Fields the verifier does not inspect.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentMetadata {
    /// Decode from a parsed JSON document. Returns `None` for non-objects.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(mut map) = value else {
            return None;
        };

        let display_name = take_string(&mut map, &["name", "displayName"]);
        let schema_tag = take_string(&mut map, &["type", "schema"]);
        let active = match map.remove("active") {
            Some(serde_json::Value::Bool(b)) => b,
            Some(serde_json::Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        };

        Some(Self {
            display_name,
            schema_tag,
            active,
            extra: map,
        })
    }

    /// Decode an inline `data:application/json;base64,` locator.
    ///
    /// Returns `Ok(None)` when the URI is not inline.
    pub fn from_uri(uri: &str) -> Result<Option<Self>, String> {
        let Some(payload) = uri.trim().strip_prefix(INLINE_JSON_PREFIX) else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| format!("base64: {e}"))?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| format!("json: {e}"))?;
        Self::from_json(value)
            .map(Some)
            .ok_or_else(|| "metadata is not a JSON object".to_string())
    }

    pub fn matches(&self, identity: &str, schema_tag: &str) -> bool {
        self.active
            && self.display_name.as_deref() == Some(identity)
            && self
                .schema_tag
                .as_deref()
                .is_some_and(|tag| tag.contains(schema_tag))
    }
}

fn take_string(
    map: &mut serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    for key in keys {
        if let Some(serde_json::Value::String(s)) = map.get(*key) {
            let s = s.clone();
            map.remove(*key);
            return Some(s);
        }
    }
    None
}

/// On-chain registry verification strategy.
pub struct OnChainScanner {
    registry: Arc<dyn RegistryClient>,
    max_scan_range: u64,
    schema_tag: String,
}

impl OnChainScanner {
    pub fn new(registry: Arc<dyn RegistryClient>, max_scan_range: u64, schema_tag: &str) -> Self {
        Self {
            registry,
            max_scan_range,
            schema_tag: schema_tag.to_string(),
        }
    }

    pub async fn fetch_entry(&self, token_id: u64) -> TokenFetch {
        let owner = match self.registry.owner_of(token_id).await {
            Ok(owner) => owner,
            Err(e) => return TokenFetch::FetchFailed(e.to_string()),
        };
        if owner.trim().eq_ignore_ascii_case(NULL_ADDRESS) {
            return TokenFetch::Unallocated;
        }
        match self.registry.token_uri(token_id).await {
            Ok(metadata_uri) => TokenFetch::Found(RegistryEntry {
                token_id,
                owner,
                metadata_uri,
            }),
            Err(e) => TokenFetch::FetchFailed(e.to_string()),
        }
    }

    /// Whether `entry` is a credential for `identity`.
    ///
    /// Undecodable inline metadata never matches.
    pub fn entry_matches(&self, entry: &RegistryEntry, identity: &str) -> bool {
        match AgentMetadata::from_uri(&entry.metadata_uri) {
            Ok(Some(metadata)) => metadata.matches(identity, &self.schema_tag),
            Ok(None) => entry.metadata_uri.contains(identity),
            Err(reason) => {
                tracing::debug!(
                    token_id = entry.token_id,
                    %reason,
                    "Skipping token with undecodable metadata"
                );
                false
            }
        }
    }
}

#[async_trait]
impl VerificationStrategy for OnChainScanner {
    fn name(&self) -> &'static str {
        "onchain_scan"
    }

    async fn verify(&self, identity: &str) -> VerificationOutcome {
        if let Err(e) = self.registry.chain_id().await {
            return VerificationOutcome::error(format!("registry unreachable: {e}"));
        }

        let mut skipped = 0u64;
        for token_id in 1..=self.max_scan_range {
            match self.fetch_entry(token_id).await {
                TokenFetch::Found(entry) => {
                    if self.entry_matches(&entry, identity) {
                        tracing::debug!(identity, token_id, skipped, "Registry match");
                        return VerificationOutcome::verified(Some(token_id));
                    }
                }
                TokenFetch::Unallocated => {}
                TokenFetch::FetchFailed(reason) => {
                    skipped += 1;
                    tracing::trace!(token_id, %reason, "Token fetch failed");
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(identity, skipped, "Scan finished with unreadable tokens");
        }
        VerificationOutcome::not_verified("not registered")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::RegistryError;

    #[derive(Clone)]
    enum Token {
        Unallocated,
        Broken,
        Owned(String),
    }

    #[derive(Default)]
    struct InMemoryRegistry {
        tokens: HashMap<u64, Token>,
        offline: bool,
        owner_reads: AtomicUsize,
    }

    impl InMemoryRegistry {
        fn with(mut self, id: u64, token: Token) -> Self {
            self.tokens.insert(id, token);
            self
        }
    }

    fn rpc_failure() -> RegistryError {
        RegistryError::Rpc {
            method: "eth_call".to_string(),
            code: -32000,
            message: "execution reverted".to_string(),
        }
    }

    #[async_trait]
    impl RegistryClient for InMemoryRegistry {
        async fn chain_id(&self) -> Result<u64, RegistryError> {
            if self.offline {
                Err(RegistryError::Transport {
                    method: "eth_chainId".to_string(),
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(8453)
            }
        }

        async fn owner_of(&self, token_id: u64) -> Result<String, RegistryError> {
            self.owner_reads.fetch_add(1, Ordering::SeqCst);
            match self.tokens.get(&token_id) {
                None | Some(Token::Unallocated) => Ok(NULL_ADDRESS.to_string()),
                Some(Token::Broken) => Err(rpc_failure()),
                Some(Token::Owned(_)) => Ok(format!("0x{}", "11".repeat(20))),
            }
        }

        async fn token_uri(&self, token_id: u64) -> Result<String, RegistryError> {
            match self.tokens.get(&token_id) {
                Some(Token::Owned(uri)) => Ok(uri.clone()),
                _ => Err(rpc_failure()),
            }
        }
    }

    fn inline(doc: serde_json::Value) -> Token {
        Token::Owned(format!(
            "{INLINE_JSON_PREFIX}{}",
            BASE64.encode(doc.to_string())
        ))
    }

    fn credential(name: &str, active: bool) -> Token {
        inline(serde_json::json!({
            "type": "https://eips.ethereum.org/EIPS/eip-8004#registration-v1",
            "name": name,
            "active": active,
            "supportedTrust": ["reputation"],
        }))
    }

    fn scanner(registry: InMemoryRegistry, range: u64) -> OnChainScanner {
        OnChainScanner::new(Arc::new(registry), range, "eip-8004")
    }

    #[tokio::test]
    async fn first_matching_token_after_gaps_is_returned() {
        let registry = InMemoryRegistry::default()
            .with(1, Token::Unallocated)
            .with(2, credential("Agent_Bob", true))
            .with(3, credential("Agent_Rex", true));

        let outcome = scanner(registry, 10).verify("Agent_Rex").await;
        assert_eq!(outcome, VerificationOutcome::verified(Some(3)));
    }

    #[tokio::test]
    async fn lowest_token_id_wins() {
        let registry = InMemoryRegistry::default()
            .with(5, credential("Agent_Rex", true))
            .with(9, credential("Agent_Rex", true));

        let outcome = scanner(registry, 20).verify("Agent_Rex").await;
        assert_eq!(outcome, VerificationOutcome::verified(Some(5)));
    }

    #[tokio::test]
    async fn unreadable_tokens_are_skipped() {
        let registry = InMemoryRegistry::default()
            .with(1, Token::Broken)
            .with(2, Token::Owned(format!("{INLINE_JSON_PREFIX}!!not-base64!!")))
            .with(3, Token::Owned(format!("{INLINE_JSON_PREFIX}{}", BASE64.encode("{"))))
            .with(4, credential("Agent_Rex", true));

        let outcome = scanner(registry, 10).verify("Agent_Rex").await;
        assert_eq!(outcome, VerificationOutcome::verified(Some(4)));
    }

    #[tokio::test]
    async fn inactive_or_untagged_credentials_do_not_match() {
        let registry = InMemoryRegistry::default()
            .with(1, credential("Agent_Rex", false))
            .with(
                2,
                inline(serde_json::json!({"type": "profile", "name": "Agent_Rex", "active": true})),
            );

        let outcome = scanner(registry, 5).verify("Agent_Rex").await;
        assert_eq!(outcome, VerificationOutcome::not_verified("not registered"));
    }

    #[tokio::test]
    async fn scan_stops_at_max_range() {
        let registry = InMemoryRegistry::default().with(6, credential("Agent_Rex", true));
        let registry = Arc::new(registry);
        let scanner = OnChainScanner::new(registry.clone(), 5, "eip-8004");

        let outcome = scanner.verify("Agent_Rex").await;
        assert_eq!(outcome, VerificationOutcome::not_verified("not registered"));
        assert_eq!(registry.owner_reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn external_uri_falls_back_to_substring() {
        let registry = InMemoryRegistry::default()
            .with(1, Token::Owned("ipfs://agents/Agent_Bob.json".to_string()))
            .with(2, Token::Owned("ipfs://agents/Agent_Rex.json".to_string()));

        let outcome = scanner(registry, 5).verify("Agent_Rex").await;
        assert_eq!(outcome, VerificationOutcome::verified(Some(2)));
    }

    #[tokio::test]
    async fn unreachable_registry_is_an_error() {
        let registry = InMemoryRegistry {
            offline: true,
            ..Default::default()
        };
        let outcome = scanner(registry, 5).verify("Agent_Rex").await;
        assert!(matches!(outcome, VerificationOutcome::Error { .. }));
    }

    #[test]
    fn metadata_accepts_alternate_field_names() {
        let metadata = AgentMetadata::from_json(serde_json::json!({
            "displayName": "Agent_Rex",
            "schema": "eip-8004",
            "active": "true",
            "endpoint": "https://rex.example",
        }))
        .unwrap();

        assert!(metadata.matches("Agent_Rex", "eip-8004"));
        assert!(metadata.extra.contains_key("endpoint"));
        assert!(!metadata.matches("Agent_Re", "eip-8004"));
    }
}
