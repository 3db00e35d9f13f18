//! Courier Server
//!
//! Run with: cargo run -- serve
//!
//! # Configuration
//!
//! Read from `--config`, or the first of `~/.config/courier/config.toml`,
//! `/etc/courier/config.toml` and `./config.toml`. `COURIER_*` environment
//! variables override file values; `RUST_LOG` overrides the log level.

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier::api::{serve, AppState};
use courier::config::{generate_default_config, Config, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time WebSocket hub for chat, typing and presence")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server
    Serve {
        /// Config file (default: standard locations)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = match config {
                Some(path) => Config::load_with_env(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                // The configured subscriber is not known yet
                None => tracing::subscriber::with_default(
                    bootstrap_subscriber(std::io::stderr),
                    Config::load_default,
                ),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            init_tracing(&config.logging);
            run(config).await?;
        }
        Commands::Config { output } => {
            let config = generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Courier v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        queue_capacity = config.hub.queue_capacity,
        session_policy = ?config.hub.session_policy,
        read_timeout_ms = config.session.read_timeout_ms,
        ping_interval_ms = config.session.ping_interval_ms,
        "Hub configured"
    );
    if config.auth.push_token.is_none() {
        tracing::warn!("No push token configured, push API is open");
    }

    let state = AppState::new(config.server, config.hub, config.session, &config.auth);
    serve(state).await?;

    tracing::info!("Courier stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("courier={},tower_http=info", logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Plain subscriber for events emitted while the config is being located
fn bootstrap_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_discovery_is_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = bootstrap_subscriber(move || writer.clone());

        tracing::subscriber::with_default(subscriber, Config::load_default);

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(
            output.contains("Using default config") || output.contains("config from"),
            "nothing logged: {output:?}"
        );
    }
}
