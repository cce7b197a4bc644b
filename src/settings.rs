//! Operator settings persistence.
//!
//! Stores gateway settings in `~/.agentgate/config.toml`. Settings are
//! resolved with env var > config.toml > default priority; the env layer is
//! applied in [`crate::config`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Canonical verification strategy names accepted in settings and env vars.
pub const SUPPORTED_STRATEGIES: [&str; 2] = ["remote_attestation", "onchain_scan"];

/// Normalize strategy aliases to the canonical names.
pub fn normalize_strategy(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        "remote_attestation" | "attestation" | "remote" | "gatekeeper" => {
            Some("remote_attestation")
        }
        "onchain_scan" | "on_chain_scan" | "onchain" | "scan" | "registry" => Some("onchain_scan"),
        _ => None,
    }
}

/// Gateway settings persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Agent naming convention used by the classifier.
    #[serde(default)]
    pub naming: NamingSettings,

    /// Strategy selection and shared timeouts.
    #[serde(default)]
    pub verification: VerificationSettings,

    /// Remote attestation service.
    #[serde(default)]
    pub attestation: AttestationSettings,

    /// On-chain credential registry.
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Player-facing message templates.
    #[serde(default)]
    pub messages: MessageSettings,
}

/// Prefix/suffix rules for agent identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamingSettings {
    #[serde(default = "default_name_prefixes")]
    pub prefixes: Vec<String>,

    #[serde(default = "default_name_suffixes")]
    pub suffixes: Vec<String>,
}

fn default_name_prefixes() -> Vec<String> {
    [
        "Agent_",
        "Builder_",
        "Miner_",
        "Trader_",
        "Explorer_",
        "Warrior_",
        "Architect_",
        "Farmer_",
        "Merchant_",
        "Guardian_",
        "Crafter_",
        "Hunter_",
        "Scholar_",
        "Mystic_",
        "Engineer_",
        "ClawCraft_",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_name_suffixes() -> Vec<String> {
    ["_AI", "_Bot", "_Agent"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            prefixes: default_name_prefixes(),
            suffixes: default_name_suffixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationSettings {
    /// "remote_attestation" or "onchain_scan".
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Connect timeout for every outbound verification call.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Total per-request timeout for every outbound verification call.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Upper bound on one whole verification attempt (all calls included).
    /// Unset means derived from the strategy; see
    /// [`crate::config::default_deadline`].
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Size of the verification worker pool.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_strategy() -> String {
    "remote_attestation".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrent() -> usize {
    32
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            connect_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
            deadline_ms: None,
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttestationSettings {
    /// Base URL; requests go to `<endpoint>/verify-agent`.
    #[serde(default = "default_attestation_endpoint")]
    pub endpoint: String,
}

fn default_attestation_endpoint() -> String {
    "http://localhost:3002".to_string()
}

impl Default for AttestationSettings {
    fn default() -> Self {
        Self {
            endpoint: default_attestation_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySettings {
    /// JSON-RPC endpoint of the chain hosting the registry.
    #[serde(default = "default_registry_rpc_url")]
    pub rpc_url: String,

    /// Identity registry contract address.
    #[serde(default = "default_registry_address")]
    pub address: String,

    /// Highest token id examined by the on-chain scan.
    #[serde(default = "default_max_scan_range")]
    pub max_scan_range: u64,

    /// Marker that must appear in a credential document's type field.
    #[serde(default = "default_schema_tag")]
    pub schema_tag: String,
}

fn default_registry_rpc_url() -> String {
    "https://mainnet.base.org".to_string()
}

fn default_registry_address() -> String {
    "0xc488c53fdd58b2f71D4F3469D89458bE0B3a3C41".to_string()
}

fn default_max_scan_range() -> u64 {
    1_000
}

fn default_schema_tag() -> String {
    "eip-8004".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            rpc_url: default_registry_rpc_url(),
            address: default_registry_address(),
            max_scan_range: default_max_scan_range(),
            schema_tag: default_schema_tag(),
        }
    }
}

/// Message templates. Placeholders: `{identity}`, `{registry}`,
/// `{register_url}`, `{spectate_url}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageSettings {
    #[serde(default = "default_register_url")]
    pub register_url: String,

    #[serde(default = "default_spectate_url")]
    pub spectate_url: String,

    #[serde(default = "default_not_agent_message")]
    pub not_agent: String,

    #[serde(default = "default_not_registered_message")]
    pub not_registered: String,

    #[serde(default = "default_unavailable_message")]
    pub unavailable: String,

    #[serde(default = "default_welcome_message")]
    pub welcome: String,
}

fn default_register_url() -> String {
    "https://clawcraft.xyz/register".to_string()
}

fn default_spectate_url() -> String {
    "https://clawcraft.xyz/watch".to_string()
}

fn default_not_agent_message() -> String {
    "Only verified AI agents can join.\n\
     Register your agent at: {register_url}\n\
     Humans can spectate at: {spectate_url}"
        .to_string()
}

fn default_not_registered_message() -> String {
    "Agent '{identity}' is not registered in the credential registry.\n\
     Register at: {register_url} and retry.\n\
     Registry: {registry}"
        .to_string()
}

fn default_unavailable_message() -> String {
    "Verification system unavailable.\n\
     Could not check the registration for '{identity}'.\n\
     Please retry shortly."
        .to_string()
}

fn default_welcome_message() -> String {
    "Verification successful. Welcome, {identity}!".to_string()
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            register_url: default_register_url(),
            spectate_url: default_spectate_url(),
            not_agent: default_not_agent_message(),
            not_registered: default_not_registered_message(),
            unavailable: default_unavailable_message(),
            welcome: default_welcome_message(),
        }
    }
}

fn validate_http_endpoint(endpoint_url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(endpoint_url).map_err(|e| format!("URL parse failed: {}", e))?;

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("URL contains userinfo (@), which is not allowed".to_string());
    }

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(format!(
                "scheme '{}' is not allowed (allowed: http, https)",
                other
            ));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err("URL is missing host".to_string());
    }

    Ok(())
}

impl Settings {
    /// Default TOML config file path (`~/.agentgate/config.toml`).
    pub fn default_toml_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agentgate")
            .join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Write a commented TOML config file with current settings.
    pub fn save_toml(&self, path: &Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# agentgate configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             # Run `agentgate config init` to regenerate this file.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }

        std::fs::write(path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    /// Get a setting value by dotted path (e.g., "registry.max_scan_range").
    ///
    /// Lists are shown comma separated, the form `set` accepts back.
    pub fn get(&self, path: &str) -> Option<String> {
        let (section, key) = path.split_once('.')?;
        let json = serde_json::to_value(self).ok()?;
        json.get(section)?.get(key).and_then(display_value)
    }

    /// Set a setting value by dotted path.
    ///
    /// Returns error if path is invalid or value cannot be parsed.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), String> {
        match path {
            "verification.strategy" => {
                let normalized = normalize_strategy(value).ok_or_else(|| {
                    format!(
                        "Invalid verification.strategy '{}'. Expected one of: {}",
                        value,
                        SUPPORTED_STRATEGIES.join(", ")
                    )
                })?;
                self.verification.strategy = normalized.to_string();
                return Ok(());
            }
            "verification.deadline_ms" => {
                self.verification.deadline_ms = match value.trim() {
                    AUTO => None,
                    ms => Some(ms.parse().map_err(|_| {
                        format!("Expected integer or '{AUTO}' for {path}, got '{value}'")
                    })?),
                };
                return Ok(());
            }
            "attestation.endpoint" | "registry.rpc_url" => {
                let endpoint = value.trim();
                validate_http_endpoint(endpoint).map_err(|e| format!("Invalid {path}: {e}"))?;
                if path == "attestation.endpoint" {
                    self.attestation.endpoint = endpoint.to_string();
                } else {
                    self.registry.rpc_url = endpoint.to_string();
                }
                return Ok(());
            }
            _ => {}
        }

        let new_value = match self.field(path)? {
            serde_json::Value::Number(_) => value
                .trim()
                .parse::<u64>()
                .map(serde_json::Value::from)
                .map_err(|_| format!("Expected integer for {path}, got '{value}'"))?,
            serde_json::Value::Array(_) => serde_json::Value::from(split_list(value)),
            serde_json::Value::String(_) => serde_json::Value::from(value),
            _ => return Err(format!("{path} cannot be set from the command line")),
        };
        self.replace_field(path, new_value)
    }

    /// Reset a setting to its default value.
    pub fn reset(&mut self, path: &str) -> Result<(), String> {
        let default = Self::default().field(path)?;
        self.replace_field(path, default)
    }

    /// List all settings as (path, value) pairs, sorted by path.
    pub fn list(&self) -> Vec<(String, String)> {
        let Ok(serde_json::Value::Object(sections)) = serde_json::to_value(self) else {
            return Vec::new();
        };

        let mut results: Vec<(String, String)> = sections
            .iter()
            .filter_map(|(section, fields)| Some((section, fields.as_object()?)))
            .flat_map(|(section, fields)| {
                fields.iter().filter_map(move |(key, value)| {
                    Some((format!("{section}.{key}"), display_value(value)?))
                })
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Current JSON value of a `section.key` leaf.
    fn field(&self, path: &str) -> Result<serde_json::Value, String> {
        let (section, key) = path
            .split_once('.')
            .ok_or_else(|| format!("Expected section.key, got '{path}'"))?;
        let json =
            serde_json::to_value(self).map_err(|e| format!("Failed to serialize settings: {e}"))?;
        json.get(section)
            .and_then(|fields| fields.get(key))
            .cloned()
            .ok_or_else(|| format!("Unknown setting: {path}"))
    }

    /// Replace a `section.key` leaf and re-validate the whole document.
    fn replace_field(&mut self, path: &str, value: serde_json::Value) -> Result<(), String> {
        let (section, key) = path
            .split_once('.')
            .ok_or_else(|| format!("Expected section.key, got '{path}'"))?;
        let mut json =
            serde_json::to_value(&self).map_err(|e| format!("Failed to serialize settings: {e}"))?;
        let fields = json
            .get_mut(section)
            .and_then(serde_json::Value::as_object_mut)
            .filter(|fields| fields.contains_key(key))
            .ok_or_else(|| format!("Unknown setting: {path}"))?;
        fields.insert(key.to_string(), value);

        *self = serde_json::from_value(json).map_err(|e| format!("Failed to apply {path}: {e}"))?;
        Ok(())
    }
}

/// Shown for settings whose value is derived at load time.
const AUTO: &str = "auto";

fn display_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Null => Some(AUTO.to_string()),
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        serde_json::Value::Bool(_) | serde_json::Value::Object(_) => None,
    }
}

/// Split a comma separated list, dropping empty entries.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}
