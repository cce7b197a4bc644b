//! Configuration for agentgate.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! The resolved [`GatewayConfig`] is immutable; a reload builds a fresh value
//! and the gateway swaps it in whole.

pub(crate) mod helpers;

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::settings::{Settings, split_list};

/// Address reported by the registry for tokens that were never minted.
pub const NULL_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Which verification strategy the gateway dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    RemoteAttestation,
    OnChainScan,
}

impl StrategyKind {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match crate::settings::normalize_strategy(value) {
            Some("remote_attestation") => Ok(Self::RemoteAttestation),
            Some("onchain_scan") => Ok(Self::OnChainScan),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!(
                    "expected 'remote_attestation' or 'onchain_scan', got '{value}'"
                ),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteAttestation => "remote_attestation",
            Self::OnChainScan => "onchain_scan",
        }
    }
}

/// Prefix and suffix rules for the name classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingRules {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub rpc_url: String,
    pub address: String,
    pub max_scan_range: u64,
    pub schema_tag: String,
}

/// Player-facing templates; see [`crate::settings::MessageSettings`].
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    pub register_url: String,
    pub spectate_url: String,
    pub not_agent: String,
    pub not_registered: String,
    pub unavailable: String,
    pub welcome: String,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub naming: NamingRules,
    pub strategy: StrategyKind,
    pub attestation_endpoint: String,
    pub registry: RegistryConfig,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Bound on a whole verification attempt, across all network calls.
    pub deadline: Duration,
    pub max_concurrent: usize,
    pub messages: MessageTemplates,
}

/// Deadline for a remote attestation attempt when none is configured.
const ATTESTATION_DEADLINE: Duration = Duration::from_secs(60);

/// Default bound on one verification attempt for `strategy`.
///
/// A scan must be able to exhaust its range with every call running to its
/// timeout: the connection check plus `ownerOf` and `tokenURI` per token.
pub fn default_deadline(
    strategy: StrategyKind,
    request_timeout: Duration,
    max_scan_range: u64,
) -> Duration {
    match strategy {
        StrategyKind::RemoteAttestation => ATTESTATION_DEADLINE,
        StrategyKind::OnChainScan => {
            let calls = max_scan_range.saturating_mul(2).saturating_add(1);
            request_timeout.saturating_mul(u32::try_from(calls).unwrap_or(u32::MAX))
        }
    }
}

fn positive_millis(key: &str, env: Option<u64>, fallback: u64) -> Result<Duration, ConfigError> {
    let ms = env.unwrap_or(fallback);
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

fn validate_registry_address(address: &str, key: &str) -> Result<(), ConfigError> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or("");
    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a 0x-prefixed 20-byte hex address, got '{address}'"),
        });
    }
    if address.eq_ignore_ascii_case(NULL_ADDRESS) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "registry address must not be the null address".to_string(),
        });
    }
    Ok(())
}

impl NamingRules {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let prefixes = helpers::optional_env("AGENTGATE_NAME_PREFIXES")?
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| settings.naming.prefixes.clone());
        let suffixes = helpers::optional_env("AGENTGATE_NAME_SUFFIXES")?
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| settings.naming.suffixes.clone());

        // An empty pattern would match every identity.
        let prefixes: Vec<String> = prefixes.into_iter().filter(|p| !p.is_empty()).collect();
        let suffixes: Vec<String> = suffixes.into_iter().filter(|s| !s.is_empty()).collect();

        if prefixes.is_empty() && suffixes.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "naming.prefixes".to_string(),
                hint: "Configure at least one agent name prefix or suffix.".to_string(),
            });
        }

        Ok(Self { prefixes, suffixes })
    }
}

impl RegistryConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let rpc_url = helpers::optional_env("REGISTRY_RPC_URL")?
            .unwrap_or_else(|| settings.registry.rpc_url.clone());
        url::Url::parse(&rpc_url).map_err(|e| ConfigError::InvalidValue {
            key: "REGISTRY_RPC_URL".to_string(),
            message: format!("URL parse failed: {e}"),
        })?;

        let address = helpers::optional_env("REGISTRY_ADDRESS")?
            .unwrap_or_else(|| settings.registry.address.clone());
        validate_registry_address(&address, "REGISTRY_ADDRESS")?;

        let max_scan_range = helpers::parse_optional_env::<u64>(
            "REGISTRY_MAX_SCAN_RANGE",
            "must be a positive integer",
        )?
        .unwrap_or(settings.registry.max_scan_range);
        if max_scan_range == 0 {
            return Err(ConfigError::InvalidValue {
                key: "REGISTRY_MAX_SCAN_RANGE".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let schema_tag = helpers::optional_env("REGISTRY_SCHEMA_TAG")?
            .unwrap_or_else(|| settings.registry.schema_tag.clone());
        if schema_tag.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "REGISTRY_SCHEMA_TAG".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            rpc_url,
            address,
            max_scan_range,
            schema_tag,
        })
    }
}

impl MessageTemplates {
    fn from_settings(settings: &Settings) -> Self {
        let messages = &settings.messages;
        Self {
            register_url: messages.register_url.clone(),
            spectate_url: messages.spectate_url.clone(),
            not_agent: messages.not_agent.clone(),
            not_registered: messages.not_registered.clone(),
            unavailable: messages.unavailable.clone(),
            welcome: messages.welcome.clone(),
        }
    }
}

impl GatewayConfig {
    /// Resolve env overrides on top of `settings`.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let strategy = StrategyKind::parse(
            &helpers::optional_env("AGENTGATE_STRATEGY")?
                .unwrap_or_else(|| settings.verification.strategy.clone()),
            "AGENTGATE_STRATEGY",
        )?;

        let attestation_endpoint = helpers::optional_env("ATTESTATION_ENDPOINT")?
            .unwrap_or_else(|| settings.attestation.endpoint.clone());
        url::Url::parse(&attestation_endpoint).map_err(|e| ConfigError::InvalidValue {
            key: "ATTESTATION_ENDPOINT".to_string(),
            message: format!("URL parse failed: {e}"),
        })?;

        let connect_timeout = positive_millis(
            "VERIFY_CONNECT_TIMEOUT_MS",
            helpers::parse_optional_env("VERIFY_CONNECT_TIMEOUT_MS", "must be a positive integer")?,
            settings.verification.connect_timeout_ms,
        )?;
        let request_timeout = positive_millis(
            "VERIFY_REQUEST_TIMEOUT_MS",
            helpers::parse_optional_env("VERIFY_REQUEST_TIMEOUT_MS", "must be a positive integer")?,
            settings.verification.request_timeout_ms,
        )?;
        let registry = RegistryConfig::resolve(settings)?;
        let deadline = match helpers::parse_optional_env::<u64>(
            "VERIFY_DEADLINE_MS",
            "must be a positive integer",
        )?
        .or(settings.verification.deadline_ms)
        {
            Some(ms) => positive_millis("VERIFY_DEADLINE_MS", None, ms)?,
            None => default_deadline(strategy, request_timeout, registry.max_scan_range),
        };

        let max_concurrent = helpers::parse_optional_env::<usize>(
            "VERIFY_MAX_CONCURRENT",
            "must be a positive integer",
        )?
        .unwrap_or(settings.verification.max_concurrent);
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VERIFY_MAX_CONCURRENT".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            naming: NamingRules::resolve(settings)?,
            strategy,
            attestation_endpoint,
            registry,
            connect_timeout,
            request_timeout,
            deadline,
            max_concurrent,
            messages: MessageTemplates::from_settings(settings),
        })
    }

    /// Load configuration from `.env` files, an optional TOML file and env vars.
    ///
    /// If `toml_path` is `Some`, the file must exist and parse. If `None`,
    /// `~/.agentgate/config.toml` is tried and a missing file is ignored.
    pub fn load(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_agentgate_env();
        let settings = load_settings(toml_path)?;
        Self::resolve(&settings)
    }
}

#[cfg(test)]
impl GatewayConfig {
    /// Default configuration built without consulting the environment.
    pub(crate) fn for_tests() -> Self {
        let settings = Settings::default();
        Self {
            naming: NamingRules {
                prefixes: settings.naming.prefixes.clone(),
                suffixes: settings.naming.suffixes.clone(),
            },
            strategy: StrategyKind::RemoteAttestation,
            attestation_endpoint: settings.attestation.endpoint.clone(),
            registry: RegistryConfig {
                rpc_url: settings.registry.rpc_url.clone(),
                address: settings.registry.address.clone(),
                max_scan_range: settings.registry.max_scan_range,
                schema_tag: settings.registry.schema_tag.clone(),
            },
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(60),
            max_concurrent: 4,
            messages: MessageTemplates::from_settings(&settings),
        }
    }
}

/// Load settings from the TOML file layer only (no env overrides).
pub fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_toml_path);

    match Settings::load_toml(&path) {
        Ok(Some(settings)) => {
            tracing::debug!("Loaded TOML config from {}", path.display());
            Ok(settings)
        }
        Ok(None) => {
            if explicit_path.is_some() {
                return Err(ConfigError::ParseError(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            Ok(Settings::default())
        }
        Err(e) => {
            if explicit_path.is_some() {
                return Err(ConfigError::ParseError(format!(
                    "Failed to load config file {}: {}",
                    path.display(),
                    e
                )));
            }
            tracing::warn!("Failed to load default config file, using defaults: {}", e);
            Ok(Settings::default())
        }
    }
}
