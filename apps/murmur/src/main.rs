use clap::{Args, Parser};
use murmur_client_core::client::{ChatClient, ChatSession, ClientError};
use murmur_client_core::config::{Config, ConfigError};
use murmur_client_core::room::RoomId;
use murmur_client_core::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use murmur_client_core::transport::TransportError;
use murmur_client_core::transport::replay::ReplayTransport;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use time::UtcOffset;
use tracing::{debug, info};

fn main() {
    // Must be read before any other thread exists.
    let utc_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    if let Err(err) = run(utc_offset) {
        eprintln!("murmur: {err}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(name = "murmur", about = "Terminal chat client", author, version)]
struct Cli {
    #[arg(long, short = 'r', value_name = "ROOM", help = "Room id or alias to join on start")]
    room: Option<String>,

    #[arg(
        long,
        value_name = "PATH",
        env = "MURMUR_REPLAY",
        help = "Replay a recorded homeserver fixture instead of connecting"
    )]
    replay: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        env = "MURMUR_CONFIG",
        help = "Config file (defaults to ~/.murmur/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "USER_ID",
        env = "MURMUR_USER",
        default_value = "@guest:localhost",
        help = "User id when no fixture is given"
    )]
    user: String,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "MURMUR_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "MURMUR_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Client(#[from] ClientError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

fn run(utc_offset: UtcOffset) -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let config = Config::load(cli.config.as_deref())?;
    debug!(?config, "configuration loaded");

    let transport = match &cli.replay {
        Some(path) => {
            info!(fixture = %path.display(), "replaying fixture");
            ReplayTransport::from_path(path)?
        }
        None => ReplayTransport::empty(&cli.user)?,
    };
    let session = ChatSession::new(Arc::new(transport), config.session_settings(), utc_offset);
    let client = ChatClient::new(session, config.scroll_page, config.input_height);
    client.run(cli.room.map(RoomId::from))?;
    Ok(())
}
