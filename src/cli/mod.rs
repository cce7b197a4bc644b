//! Operator command line.

pub mod doctor;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::classifier::{Classification, NameClassifier};
use crate::config::{GatewayConfig, load_settings};
use crate::gateway::{Attempt, ConnectingSession, Decision, VerificationGateway};
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "agentgate",
    version,
    about = "Admission gateway that lets only verified AI agents join"
)]
pub struct Cli {
    /// Path to a TOML config file (default: ~/.agentgate/config.toml).
    #[arg(long, global = true, env = "AGENTGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the naming check only. No network access.
    Classify { identity: String },

    /// Run the full admission flow for one identity and print the decision.
    ///
    /// Exits non-zero when the identity is denied.
    Check {
        identity: String,

        /// Origin address recorded on the session.
        #[arg(long, default_value = "127.0.0.1:0")]
        origin: SocketAddr,
    },

    /// Probe configuration and external dependencies.
    Doctor {
        /// Exit non-zero if any check fails.
        #[arg(long)]
        strict: bool,
    },

    /// Inspect or edit the settings file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a settings file with defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print every setting as `path = value`.
    Show,
    /// Print one setting.
    Get { path: String },
    /// Change one setting and save.
    Set { path: String, value: String },
    /// Restore one setting to its default and save.
    Reset { path: String },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Classify { identity } => run_classify(config_path, &identity),
        Command::Check { identity, origin } => run_check(config_path, identity, origin).await,
        Command::Doctor { strict } => doctor::run_doctor_command(config_path, strict).await,
        Command::Config(cmd) => run_config_command(config_path, cmd),
    }
}

fn run_classify(config_path: Option<&Path>, identity: &str) -> anyhow::Result<()> {
    let config = GatewayConfig::load(config_path)?;
    let classifier = NameClassifier::new(&config.naming);
    match classifier.classify(identity) {
        Classification::Candidate => println!("{identity}: candidate"),
        Classification::Rejected => println!("{identity}: rejected (not an agent identity)"),
    }
    Ok(())
}

async fn run_check(
    config_path: Option<&Path>,
    identity: String,
    origin: SocketAddr,
) -> anyhow::Result<()> {
    let config = GatewayConfig::load(config_path)?;
    tracing::debug!(strategy = config.strategy.as_str(), "Loaded gateway config");

    let gateway = VerificationGateway::new(config, tokio::runtime::Handle::current())?;
    let session = ConnectingSession::new(identity, origin);

    if let Attempt::Dispatched(task) = gateway.on_connection_attempt(&session) {
        task.await?;
    }

    let decision = session
        .decision()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no decision was reached"))?;
    println!("{}", serde_json::to_string_pretty(&decision)?);

    match decision {
        Decision::Admit { .. } => Ok(()),
        Decision::Reject { kind, .. } => anyhow::bail!("{} denied: {kind}", session.identity()),
    }
}

fn settings_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Settings::default_toml_path)
}

fn run_config_command(config_path: Option<&Path>, cmd: ConfigCommand) -> anyhow::Result<()> {
    let path = settings_path(config_path);
    match cmd {
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Settings::default()
                .save_toml(&path)
                .map_err(anyhow::Error::msg)?;
            println!("Wrote default settings to {}", path.display());
        }
        ConfigCommand::Show => {
            let settings = load_settings(config_path)?;
            println!("# {}", path.display());
            for (key, value) in settings.list() {
                println!("{key} = {value}");
            }
        }
        ConfigCommand::Get { path: key } => {
            let settings = load_settings(config_path)?;
            let value = settings
                .get(&key)
                .ok_or_else(|| anyhow::anyhow!("unknown setting: {key}"))?;
            println!("{value}");
        }
        ConfigCommand::Set { path: key, value } => {
            let mut settings = Settings::load_toml(&path)
                .map_err(anyhow::Error::msg)?
                .unwrap_or_default();
            settings.set(&key, &value).map_err(anyhow::Error::msg)?;
            settings.save_toml(&path).map_err(anyhow::Error::msg)?;
            println!("Set {key} in {}", path.display());
        }
        ConfigCommand::Reset { path: key } => {
            let mut settings = Settings::load_toml(&path)
                .map_err(anyhow::Error::msg)?
                .unwrap_or_default();
            settings.reset(&key).map_err(anyhow::Error::msg)?;
            settings.save_toml(&path).map_err(anyhow::Error::msg)?;
            println!("Reset {key} in {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_with_origin() {
        let cli = Cli::try_parse_from([
            "agentgate",
            "--config",
            "/tmp/agentgate.toml",
            "check",
            "Agent_Rex",
            "--origin",
            "10.0.0.1:25565",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/agentgate.toml")));
        match cli.command {
            Command::Check { identity, origin } => {
                assert_eq!(identity, "Agent_Rex");
                assert_eq!(origin.port(), 25565);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_config_set() {
        let cli = Cli::try_parse_from([
            "agentgate",
            "config",
            "set",
            "registry.max_scan_range",
            "250",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Set { ref path, ref value })
                if path == "registry.max_scan_range" && value == "250"
        ));
    }

    #[test]
    fn config_init_set_reset_edit_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        run_config_command(Some(&path), ConfigCommand::Init { force: false }).unwrap();
        assert!(run_config_command(Some(&path), ConfigCommand::Init { force: false }).is_err());

        run_config_command(
            Some(&path),
            ConfigCommand::Set {
                path: "verification.strategy".to_string(),
                value: "onchain".to_string(),
            },
        )
        .unwrap();

        let saved = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(saved.verification.strategy, "onchain_scan");

        run_config_command(
            Some(&path),
            ConfigCommand::Reset {
                path: "verification.strategy".to_string(),
            },
        )
        .unwrap();
        let saved = Settings::load_toml(&path).unwrap().unwrap();
        assert_eq!(saved.verification.strategy, "remote_attestation");
    }
}
