//! `ocbench` entry point.
//!
//! Sets the core voltage, stress-tests a clock frequency on both execution
//! units, or lists the frequencies the clock subsystem accepts.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use oc_common::config::{BenchConfig, RegisterBackend};
use oc_runtime::StressBench;
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "OCBENCH_CONFIG";

/// ocbench command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ocbench",
    about = "RP2040 core-voltage control and overclock stress bench",
    version,
    long_about = None
)]
struct Args {
    /// Path to a bench configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    /// Voltage register backend (overrides config file).
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Set the core voltage.
    Voltage {
        /// Target voltage in volts (0.85 to 1.30 in 0.05 steps).
        volts: f64,
    },
    /// Stress a frequency for the configured number of rounds.
    Run {
        /// Frequency in MHz.
        mhz: u32,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Stress a frequency until something fails.
    Soak {
        /// Frequency in MHz.
        mhz: u32,
    },
    /// List every whole-MHz frequency the clock accepts up to a limit.
    FindClocks {
        /// Highest frequency to try, in MHz.
        limit: u32,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum BackendArg {
    Simulated,
    Devmem,
}

impl From<BackendArg> for RegisterBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Simulated => RegisterBackend::Simulated,
            BackendArg::Devmem => RegisterBackend::DevMem,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ocbench");

    let mut config = load_config(&args)?;
    if let Some(backend) = args.backend {
        config.register.backend = backend.into();
    }

    info!(
        backend = ?config.register.backend,
        baseline_mhz = config.baseline_mhz,
        round_limit = config.round_limit,
        "Configuration loaded"
    );

    let mut bench = StressBench::from_config(config).context("Failed to set up the stress bench")?;
    // Unlocked: the console telemetry sink writes to stdout from the unit threads.
    let mut stdout = std::io::stdout();

    match args.command {
        Command::Voltage { volts } => commands::voltage(&mut bench, volts, &mut stdout),
        Command::Run { mhz, json } => commands::run(&bench, mhz, json, &mut stdout),
        Command::Soak { mhz } => commands::soak(&bench, mhz),
        Command::FindClocks { limit } => commands::find_clocks(&bench, limit, &mut stdout),
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("oc_cli={level},oc_runtime={level},oc_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `OCBENCH_CONFIG` environment variable
/// 3. `/etc/ocbench/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<BenchConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return BenchConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return BenchConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path:?}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    // 3. System path
    let system_path = PathBuf::from("/etc/ocbench/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return BenchConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    // 4. Local development path
    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return BenchConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    // 5. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(BenchConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_voltage() {
        let args = Args::parse_from(["ocbench", "voltage", "1.15"]);
        assert_eq!(args.command, Command::Voltage { volts: 1.15 });
        assert!(args.config.is_none());
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_run_with_globals() {
        let args = Args::parse_from([
            "ocbench", "run", "250", "--json", "-c", "bench.toml", "--backend", "devmem", "-l",
            "debug",
        ]);
        assert_eq!(args.command, Command::Run { mhz: 250, json: true });
        assert_eq!(args.config, Some(PathBuf::from("bench.toml")));
        assert_eq!(args.backend, Some(BackendArg::Devmem));
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_args_soak_and_find_clocks() {
        let args = Args::parse_from(["ocbench", "soak", "133"]);
        assert_eq!(args.command, Command::Soak { mhz: 133 });

        let args = Args::parse_from(["ocbench", "find-clocks", "300"]);
        assert_eq!(args.command, Command::FindClocks { limit: 300 });
    }

    #[test]
    fn test_args_reject_unknown_backend() {
        assert!(Args::try_parse_from(["ocbench", "--backend", "spi", "run", "133"]).is_err());
    }

    #[test]
    fn test_backend_conversion() {
        assert_eq!(RegisterBackend::from(BackendArg::Simulated), RegisterBackend::Simulated);
        assert_eq!(RegisterBackend::from(BackendArg::Devmem), RegisterBackend::DevMem);
    }

    #[test]
    fn test_load_config_from_argument() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "round_limit = 12\n[workload]\nblink_interval = \"250ms\"").unwrap();

        let path = file.path().to_str().unwrap();
        let args = Args::parse_from(["ocbench", "-c", path, "run", "133"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.round_limit, 12);
        assert_eq!(config.workload.blink_interval.as_millis(), 250);
    }

    #[test]
    fn test_load_config_missing_file() {
        let args = Args::parse_from(["ocbench", "-c", "/nonexistent/ocbench.toml", "run", "133"]);
        assert!(load_config(&args).is_err());
    }
}
