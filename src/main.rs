//! Fleet integration test runner.
//!
//! Loads a registry, orchestrates the fleet, and exits with a status
//! reflecting the verdict. Wire signals cancel the run cooperatively;
//! teardown always completes.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use fleet_tester::{
    signals, CancelToken, HealthGate, Orchestrator, ProbeRunner, ProbeSettings,
    ProcessController, ServiceRegistry,
};

#[derive(Parser)]
#[command(name = "fleet-tester")]
#[command(about = "Health-gated integration test harness for service fleets")]
struct Args {
    /// Path to the registry JSON file
    #[arg(long, env = "FLEET_REGISTRY")]
    registry: PathBuf,

    /// Working directory for launched service executables
    #[arg(long, default_value = "build")]
    build_dir: PathBuf,

    /// Per-attempt health check timeout in seconds
    #[arg(long, default_value = "5")]
    health_timeout_secs: u64,

    /// Kill stale listeners on registry ports before starting
    #[arg(long)]
    preclean: bool,

    /// Print the finalized verdict as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose tracing output
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!("🧪 Starting fleet integration run");
    let registry = ServiceRegistry::from_json_file(&args.registry)
        .with_context(|| format!("loading registry {}", args.registry.display()))?;
    tracing::info!(
        "📋 Loaded {} services, {} communication pairs",
        registry.len(),
        registry.communication_pairs().len()
    );

    #[cfg(unix)]
    {
        if args.preclean {
            let killed = fleet_tester::CleanupManager::for_registry(&registry)
                .cleanup()
                .await;
            if killed > 0 {
                tracing::info!("🧹 Precleaned {} stale processes", killed);
            }
        }
    }

    let cancel = CancelToken::new();
    signals::spawn_signal_listener(cancel.clone());

    let orchestrator = Orchestrator::new(
        registry,
        ProcessController::new(&args.build_dir),
        HealthGate::new(Duration::from_secs(args.health_timeout_secs)),
        ProbeRunner::new(ProbeSettings::default()),
    );

    let verdict = orchestrator.run(cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    }

    Ok(if verdict.overall_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("fleet_tester=debug,info")
    } else {
        EnvFilter::new("fleet_tester=info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
