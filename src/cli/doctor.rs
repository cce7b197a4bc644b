//! `agentgate doctor` - active health diagnostics.
//!
//! Validates configuration and probes the verification backends so that a
//! misconfigured endpoint shows up before the first agent tries to log in.
//! Checks that do not apply to the selected strategy are skipped.

use std::error::Error as _;
use std::path::Path;

use crate::config::{GatewayConfig, StrategyKind, load_settings};
use crate::error::RegistryError;
use crate::verify::{EvmRegistryClient, RegistryClient};

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("Agentgate Doctor");
    println!("================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    crate::bootstrap::load_agentgate_env();
    let config = load_settings(config_path)
        .map_err(|e| e.to_string())
        .and_then(|settings| GatewayConfig::resolve(&settings).map_err(|e| e.to_string()));

    check(
        "Gateway configuration",
        check_config(&config),
        &mut passed,
        &mut failed,
    );

    check(
        "Agent naming rules",
        check_naming_rules(&config),
        &mut passed,
        &mut failed,
    );

    check(
        "Attestation service",
        check_attestation_endpoint(&config).await,
        &mut passed,
        &mut failed,
    );

    check(
        "Registry RPC",
        check_registry_rpc(&config).await,
        &mut passed,
        &mut failed,
    );

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 && strict {
        anyhow::bail!("doctor strict mode failed with {failed} check(s)");
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

type ConfigResult = Result<GatewayConfig, String>;

fn check_config(config: &ConfigResult) -> CheckResult {
    match config {
        Ok(config) => CheckResult::Pass(format!(
            "strategy {}, deadline {:?}, {} worker(s)",
            config.strategy.as_str(),
            config.deadline,
            config.max_concurrent
        )),
        Err(e) => CheckResult::Fail(e.clone()),
    }
}

fn check_naming_rules(config: &ConfigResult) -> CheckResult {
    let Ok(config) = config else {
        return CheckResult::Skip("configuration invalid".into());
    };
    CheckResult::Pass(format!(
        "{} prefix(es), {} suffix(es)",
        config.naming.prefixes.len(),
        config.naming.suffixes.len()
    ))
}

async fn check_attestation_endpoint(config: &ConfigResult) -> CheckResult {
    let Ok(config) = config else {
        return CheckResult::Skip("configuration invalid".into());
    };
    if config.strategy != StrategyKind::RemoteAttestation {
        return CheckResult::Skip(format!("strategy is {}", config.strategy.as_str()));
    }

    let endpoint = config.attestation_endpoint.as_str();
    let client = match reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct HTTP client: {e}")),
    };

    match client.get(endpoint).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                CheckResult::Fail(format!(
                    "reachable but unhealthy ({status} at {})",
                    redact_url_for_display(endpoint)
                ))
            } else {
                CheckResult::Pass(format!("{} ({status})", redact_url_for_display(endpoint)))
            }
        }
        Err(e) => CheckResult::Fail(format!(
            "{} at {}: {e}",
            classify_transport_error(&e),
            redact_url_for_display(endpoint)
        )),
    }
}

async fn check_registry_rpc(config: &ConfigResult) -> CheckResult {
    let Ok(config) = config else {
        return CheckResult::Skip("configuration invalid".into());
    };
    if config.strategy != StrategyKind::OnChainScan {
        return CheckResult::Skip(format!("strategy is {}", config.strategy.as_str()));
    }

    let rpc_url = redact_url_for_display(&config.registry.rpc_url);
    let client = match EvmRegistryClient::new(
        &config.registry.rpc_url,
        &config.registry.address,
        config.request_timeout,
    ) {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct RPC client: {e}")),
    };

    match client.chain_id().await {
        Ok(chain_id) => CheckResult::Pass(format!(
            "{rpc_url} (chain id {chain_id}, scanning up to {} tokens)",
            config.registry.max_scan_range
        )),
        Err(RegistryError::Timeout { timeout, .. }) => {
            CheckResult::Fail(format!("timed out after {timeout:?} at {rpc_url}"))
        }
        Err(RegistryError::Transport { reason, .. }) => {
            CheckResult::Fail(format!("unreachable at {rpc_url}: {reason}"))
        }
        Err(e) => CheckResult::Fail(format!("{rpc_url}: {e}")),
    }
}

fn classify_transport_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        return "timed out";
    }

    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_error) = err.downcast_ref::<std::io::Error>() {
            return match io_error.kind() {
                std::io::ErrorKind::NotFound => "DNS lookup failed",
                std::io::ErrorKind::ConnectionRefused => "connection refused",
                _ => "connection failed",
            };
        }
        source = err.source();
    }

    let lowered = error.to_string().to_ascii_lowercase();
    if lowered.contains("dns")
        || lowered.contains("lookup")
        || lowered.contains("name or service not known")
        || lowered.contains("no such host")
    {
        "DNS lookup failed"
    } else {
        "connection failed"
    }
}

fn redact_url_for_display(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("redacted");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
