//! CLI entry point for the kiosk player
//!
//! Parses command line arguments, installs logging and runs the dispatch
//! loop until interrupted.

use clap::Parser;
use kiosk_player::config::LoggingConfig;
use kiosk_player::{run_startup_checks, Config, Daemon};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Kiosk player - plays tagged clips from a catalog in a repeating recipe
#[derive(Parser, Debug)]
#[command(name = "kiosk-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip startup checks (player and probe availability)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Debug verbosity 0-3, overrides the config file
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    debug: Option<u8>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn level_for(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the debug level.
///
/// The returned guard flushes the file writer on drop and must live until exit.
fn init_logging(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let level = level_for(cfg.debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,kiosk_player={level},kiosk_player_cli={level}"))
    });

    let file = cfg
        .file
        .as_deref()
        .and_then(|path| path.file_name().map(|name| (path, name)));

    match file {
        Some((path, name)) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(debug) = args.debug {
        config.logging.debug = debug;
    }
    if let Some(file) = args.log_file {
        config.logging.file = Some(file);
    }

    let _guard = init_logging(&config.logging);
    info!(config = %args.config.display(), "kiosk player starting");

    if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        error!(error = %e, "startup check failed");
        return ExitCode::FAILURE;
    }

    let daemon = match Daemon::from_config(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };
    info!(clips = daemon.catalog().len(), "catalog ready");

    match daemon.run_until_interrupted().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_levels_map_to_filters() {
        assert_eq!(level_for(0), "info");
        assert_eq!(level_for(1), "debug");
        assert_eq!(level_for(2), "trace");
        assert_eq!(level_for(3), "trace");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["kiosk-player", "-c", "/etc/kiosk.toml", "-d", "2", "--skip-checks"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/kiosk.toml"));
        assert_eq!(args.debug, Some(2));
        assert!(args.skip_checks);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn test_debug_above_three_rejected() {
        assert!(Args::try_parse_from(["kiosk-player", "--debug", "4"]).is_err());
    }
}
