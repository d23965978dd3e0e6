//! Harbor - Entry point

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};

use harbor::app;
use harbor::config::{ConfigError, ConfigLoader, HarborConfig, DEFAULT_ENV_PREFIX};
use harbor::server::{build_version, ShutdownSignal};
use harbor::telemetry::Telemetry;

/// Configuration file read when `--config` is not given, if it exists.
const DEFAULT_CONFIG_FILE: &str = "harbor.toml";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("harbor {}", build_version());
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Harbor - HTTP service with error classification and graceful shutdown

USAGE:
    harbor [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    HARBOR_SERVER__HTTP_ADDR            Listen address (default: 0.0.0.0:8080)
    HARBOR_SERVER__REQUEST_TIMEOUT_MS   Request deadline in ms (default: 2000)
    HARBOR_SHUTDOWN__DEADLINE_MS        Shutdown deadline in ms (default: 10000)
    HARBOR_METRICS__ENABLED             Serve Prometheus metrics (default: true)
    HARBOR_LOGGING__LEVEL               Log level filter (default: info)
    HARBOR_TRACING__OTLP_ENDPOINT       OpenTelemetry collector endpoint
    HARBOR_DEBUG                        Serve the /debug endpoints

Variables from a .env file in the working directory are loaded first.
Without --config, ./harbor.toml is read if present.
"
    );
}

fn load_config(path: Option<PathBuf>) -> Result<HarborConfig, ConfigError> {
    let loader = ConfigLoader::new().with_dotenv()?;
    let loader = match path {
        Some(path) => loader.with_file(path)?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    loader.with_env_prefix(DEFAULT_ENV_PREFIX).load()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging is not up yet, so configuration errors go to stderr
    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let telemetry = match Telemetry::init(config.telemetry(build_version())) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            return ExitCode::FAILURE;
        }
    };

    let signal = match ShutdownSignal::with_os_signals() {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    info!(
        service = %config.service.name,
        version = build_version(),
        environment = %config.service.environment,
        "starting harbor"
    );

    match app::run(config, telemetry, signal.recv()).await {
        Ok(report) => {
            let elapsed_ms = harbor::core::millis(report.elapsed());
            if report.is_clean() {
                info!(elapsed_ms, "harbor stopped");
            } else {
                warn!(elapsed_ms, "harbor stopped with shutdown failures");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format_args!("{e:#}"), "harbor failed to start");
            ExitCode::FAILURE
        }
    }
}
