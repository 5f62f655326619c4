//! gg-serving entry point.
//!
//! ## CLI Subcommands
//!
//! - `gg-serving` or `gg-serving serve` - Load models and serve until Ctrl+C (default)
//! - `gg-serving models` - List the versions discovery would serve (JSON)
//! - `gg-serving config show` - Print the effective configuration (JSON)
//! - `gg-serving version` - Print the version

use std::process::ExitCode;

use gg_serving::config as gg_config;
use gg_serving::models::{DirectoryVersionReader, VersionSource};
use gg_serving::shutdown::ShutdownResult;
use gg_serving::telemetry;
use gg_serving::{Runtime, RuntimeConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => {
            let env = gg_config::load();
            if let Err(e) = telemetry::init_logging(&env.log) {
                eprintln!("Logging setup failed: {}", e);
                return ExitCode::from(2u8);
            }
            match run_server(RuntimeConfig::from(&env)).await {
                Ok(ShutdownResult::Complete) => ExitCode::SUCCESS,
                Ok(ShutdownResult::Timeout { forced, failed }) => {
                    eprintln!(
                        "Shutdown grace period elapsed: {} versions force-released, {} not retired",
                        forced, failed
                    );
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("Server error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        "models" => ExitCode::from(run_models_list().await),
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => exit_code(print_json(&gg_config::load().effective_config())),
                "defaults" => exit_code(print_json(&gg_config::EnvConfig::default().effective_config())),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("gg-serving {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "gg-serving - model version lifecycle runtime v{}

USAGE:
    gg-serving [COMMAND]

COMMANDS:
    serve            Load models and serve until Ctrl+C (default)
    models           List the versions discovery would serve
    config show      Show the effective configuration
    config defaults  Show the default configuration
    version          Show version information
    help             Show this help message

ENVIRONMENT:
    GG_SERVING_MODEL_ROOT                Model repository root (default: models)
    GG_SERVING_LOAD_WAIT_TIMEOUT_MS      Max wait for a loading version (default: 10000)
    GG_SERVING_SEQUENCE_IDLE_MINUTES     Idle time before sequence eviction (default: 5)
    GG_SERVING_SEQUENCE_CLEANER_MINUTES  Sequence cleaner interval, 0 = off (default: 5)
    GG_SERVING_MAX_SEQUENCES             Max sequences per stateful version (default: 500)
    GG_SERVING_RELOAD_INTERVAL_SECS      Version discovery interval, 0 = off (default: 1)
    GG_SERVING_SHUTDOWN_GRACE_SECS       Drain grace period on shutdown (default: 30)
    GG_SERVING_STATEFUL_MODELS           Comma-separated stateful model names
    GG_SERVING_LOG_LEVEL                 Log filter (default: info)
    GG_SERVING_LOG_FORMAT                json or pretty (default: json)

EXIT CODES:
    0  Success
    1  Failure, or shutdown grace period elapsed
    2  Configuration error
",
        version
    );
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!("Serialization failed: {}", e);
            false
        }
    }
}

/// Print the desired version set of every model under the repository root.
async fn run_models_list() -> u8 {
    let env = gg_config::load();
    let readers = match DirectoryVersionReader::discover_models(&env.model_root, &env.stateful_models) {
        Ok(readers) => readers,
        Err(e) => {
            eprintln!("Discovery failed: {}", e);
            return 2;
        }
    };

    let mut listing = serde_json::Map::new();
    let mut status = 0;
    for reader in readers {
        match reader.desired_versions().await {
            Ok(desired) => {
                let versions = serde_json::to_value(&desired).unwrap_or_default();
                listing.insert(reader.model_name().to_string(), versions);
            }
            Err(e) => {
                eprintln!("{}: {}", reader.model_name(), e);
                status = 1;
            }
        }
    }
    if print_json(&listing) {
        status
    } else {
        1
    }
}

async fn run_server(config: RuntimeConfig) -> Result<ShutdownResult, Box<dyn std::error::Error>> {
    let runtime = Runtime::new(config)?;
    let initial = runtime.start().await;
    if initial.models == 0 {
        tracing::warn!(root = %runtime.config.model_root.display(), "no models found under model root");
    }

    // Wait for Ctrl+C, then retire everything
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining");

    Ok(runtime.shutdown().await)
}
