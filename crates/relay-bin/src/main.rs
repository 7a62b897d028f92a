//! cmdrelay - send commands to remote engines and capture their logs.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use command_protocol::{CodecKind, ConnectionAddr, EngineRole};
use log_relay::RELAY_LOG_TARGETS;
use observability::LogTap;
use relay_config_and_utils::{init_logging, Config, LoggingOptions, Paths};
use tracing::debug;

/// cmdrelay command-line interface.
#[derive(Parser)]
#[command(name = "cmdrelay")]
#[command(about = "Remote command transport and log relay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.cmdrelay
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Wire format (json or text). Overrides the config file.
    #[arg(long, global = true)]
    codec: Option<CodecKind>,

    /// Also write JSONL logs under the base directory
    #[arg(long, global = true)]
    log_file: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request engine that accepts remote logging requests
    Serve {
        /// Preferred listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Emit a heartbeat log event every N seconds
        #[arg(long)]
        heartbeat_secs: Option<u64>,
    },
    /// Stream log records from a remote engine until Ctrl-C
    Capture {
        /// Remote request engine (host:port)
        #[arg(short, long)]
        remote: ConnectionAddr,

        /// Preferred port for the local response engine
        #[arg(short, long)]
        port: Option<u16>,

        /// Consecutive delivery failures the remote tolerates (<= 0 for unlimited)
        #[arg(long, allow_hyphen_values = true)]
        max_failures: Option<i32>,
    },
    /// Send an Echo request
    Echo {
        /// Target engine (host:port)
        #[arg(long)]
        to: ConnectionAddr,

        /// Text to echo
        text: String,
    },
    /// Ask an engine to stop
    Stop {
        /// Target engine (host:port)
        #[arg(long)]
        to: ConnectionAddr,

        /// Role of the engine to stop (request or response)
        #[arg(long, default_value = "request")]
        target: EngineRole,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(codec) = cli.codec {
        config.codec = codec;
    }

    // Only a serving process forwards its own logs.
    let tap = matches!(cli.command, Commands::Serve { .. })
        .then(|| LogTap::default().excluding(RELAY_LOG_TARGETS));

    init_logging(
        &config.log_level,
        LoggingOptions {
            log_file: cli.log_file.then(|| paths.log_file()),
            tap: tap.clone(),
            ..Default::default()
        },
    )?;
    debug!(base_dir = %paths.base_dir().display(), codec = %config.codec, "Configuration loaded");

    match cli.command {
        Commands::Serve {
            port,
            heartbeat_secs,
        } => {
            commands::serve(
                config,
                port,
                heartbeat_secs,
                tap.unwrap_or_default(),
            )
            .await
        }
        Commands::Capture {
            remote,
            port,
            max_failures,
        } => commands::capture(config, remote, port, max_failures).await,
        Commands::Echo { to, text } => commands::echo(config, to, text).await,
        Commands::Stop { to, target } => commands::stop(config, to, target).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_capture_with_negative_max_failures() {
        let cli = Cli::try_parse_from([
            "cmdrelay",
            "capture",
            "--remote",
            "10.0.0.5:12345",
            "--max-failures",
            "-1",
            "--codec",
            "text",
        ])
        .unwrap();

        assert_eq!(cli.codec, Some(CodecKind::Text));
        match cli.command {
            Commands::Capture {
                remote,
                port,
                max_failures,
            } => {
                assert_eq!(remote, ConnectionAddr::new("10.0.0.5", 12345));
                assert_eq!(port, None);
                assert_eq!(max_failures, Some(-1));
            }
            _ => panic!("expected capture"),
        }
    }

    #[test]
    fn stop_defaults_to_request_role() {
        let cli = Cli::try_parse_from(["cmdrelay", "stop", "--to", "127.0.0.1:12345"]).unwrap();
        match cli.command {
            Commands::Stop { target, .. } => assert_eq!(target, EngineRole::Request),
            _ => panic!("expected stop"),
        }
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(Cli::try_parse_from(["cmdrelay", "echo", "--to", "nohost", "hi"]).is_err());
    }
}
