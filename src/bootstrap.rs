//! Bootstrap helpers for agentgate.
//!
//! Env vars may be persisted to `~/.agentgate/.env` so that endpoints and
//! the registry address survive restarts without touching the TOML file.

use std::path::PathBuf;

/// Path to the agentgate-specific `.env` file: `~/.agentgate/.env`.
pub fn agentgate_env_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentgate")
        .join(".env")
}

/// Load `./.env` and then `~/.agentgate/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.agentgate/.env`
pub fn load_agentgate_env() {
    let _ = dotenvy::dotenv();

    let path = agentgate_env_path();
    if path.exists() {
        let _ = dotenvy::from_path(&path);
    }
}
