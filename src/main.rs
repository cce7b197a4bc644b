use clap::Parser;
use tracing_subscriber::EnvFilter;

use agentgate::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    cli::run(Cli::parse()).await
}

/// `RUST_LOG` controls the filter; `AGENTGATE_LOG_FORMAT=json` switches to
/// JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "agentgate=info".into());
    let json = std::env::var("AGENTGATE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
