//! Error types for agentgate.

use std::time::Duration;

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Attestation error: {0}")]
    Attestation(#[from] AttestationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential registry read errors.
///
/// These surface from single `ownerOf`/`tokenURI` reads. The scanner folds
/// them into a per-token result, so only a failed connection check ever
/// reaches a verification outcome.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry client init failed: {0}")]
    ClientInit(String),

    #[error("Registry call {method} could not reach the node: {reason}")]
    Transport { method: String, reason: String },

    #[error("Registry call {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Registry call {method} failed: code={code} msg={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Registry call {method} reverted")]
    Reverted { method: String },

    #[error("Registry returned an undecodable {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

/// Remote attestation service errors.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("HTTP client init failed: {0}")]
    ClientInit(String),

    #[error("Attestation request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Attestation request failed: {0}")]
    Transport(String),

    #[error("Attestation response body is malformed: {0}")]
    MalformedBody(String),
}

impl AttestationError {
    /// Classify a reqwest failure into a timeout or a generic transport fault.
    pub(crate) fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout { timeout }
        } else {
            Self::Transport(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
