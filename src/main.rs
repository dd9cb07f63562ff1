use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use droidlink::config::{self, AppConfig, CaptureCommand, FramePacing};
use droidlink::device::AdbShell;
use droidlink::state::AppState;
use droidlink::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Sample pacing
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PacingArg {
    Asap,
    Realtime,
}

impl From<PacingArg> for FramePacing {
    fn from(arg: PacingArg) -> Self {
        match arg {
            PacingArg::Asap => FramePacing::Asap,
            PacingArg::Realtime => FramePacing::Realtime,
        }
    }
}

/// droidlink command line arguments
#[derive(Parser, Debug)]
#[command(name = "droidlink")]
#[command(version, about = "Remote view and control of Android devices over WebRTC", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Device serial passed to `adb -s`
    #[arg(short = 's', long, value_name = "SERIAL")]
    serial: Option<String>,

    /// Path to the adb binary
    #[arg(long, value_name = "PATH")]
    adb_path: Option<String>,

    /// Directory with the browser client, served at /
    #[arg(long, value_name = "DIR")]
    static_dir: Option<String>,

    /// Stream an ffmpeg test pattern instead of the device screen
    #[arg(long, conflicts_with = "loop_file")]
    test_pattern: bool,

    /// Stream a local video file in a loop instead of the device screen
    #[arg(long, value_name = "FILE")]
    loop_file: Option<String>,

    /// Sample duration policy
    #[arg(long, value_name = "PACING")]
    pacing: Option<PacingArg>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    /// Apply command line overrides on top of the loaded configuration
    fn apply(&self, config: &mut AppConfig) {
        if let Some(ref address) = self.address {
            config.web.bind_address = address.clone();
        }
        if let Some(port) = self.http_port {
            config.web.http_port = port;
        }
        if let Some(ref dir) = self.static_dir {
            config.web.static_dir = Some(dir.clone());
        }
        if let Some(ref serial) = self.serial {
            config.device.serial = Some(serial.clone());
        }
        if let Some(ref adb_path) = self.adb_path {
            config.device.adb_path = adb_path.clone();
        }
        if self.test_pattern {
            config.stream.capture = CaptureCommand::TestPattern {
                width: 360,
                height: 640,
                fps: 30,
            };
        }
        if let Some(ref path) = self.loop_file {
            config.stream.capture = CaptureCommand::LoopFile {
                path: path.clone(),
                fps: 20,
                width: 270,
                height: 480,
            };
        }
        if let Some(pacing) = self.pacing {
            config.stream.pacing = pacing.into();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting droidlink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.config {
        Some(ref path) => {
            tracing::info!("Loading configuration from {}", path.display());
            config::load_config(path).await?
        }
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config::validate(&config)?;

    tracing::info!(
        "Device: {} {}, capture: {}, pacing: {:?}, dispatch: {:?}",
        config.device.adb_path,
        config.device.serial.as_deref().unwrap_or("(default device)"),
        config.stream.capture.kind(),
        config.stream.pacing,
        config.control.dispatch
    );

    let shell = Arc::new(AdbShell::from_config(&config.device));
    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.web.bind_address, config.web.http_port
            )
        })?;

    let state = AppState::new(config, shell);
    let app = web::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the relay and reap the capture process before exiting
    state.sessions.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "droidlink=error,tower_http=error",
        LogLevel::Warn => "droidlink=warn,tower_http=warn",
        LogLevel::Info => "droidlink=info,tower_http=info",
        LogLevel::Verbose => "droidlink=debug,tower_http=info",
        LogLevel::Debug => "droidlink=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "droidlink=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
