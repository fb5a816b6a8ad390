//! Keel - application runtime kernel
//!
//! Main entry point for the Keel CLI.

mod builtin;
mod cli;

use std::path::Path;

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use keel_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, data_dir};
use keel_core::{Application, StateManager};

use cli::{Cli, Commands, ConfigAction, StateAction};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG` overrides the configured level. Log files rotate daily.
fn init_tracing(logging: &LoggingConfig, to_file: bool) -> CliResult {
    let file_layer = if to_file && logging.file {
        let log_dir = logging.log_directory();
        std::fs::create_dir_all(&log_dir)?;
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("keel")
            .filename_suffix("log")
            .max_log_files(30)
            .build(&log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Flushes buffered lines on exit.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Console output goes to stderr so command output stays parseable.
    let json_layer = logging
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!logging.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config, keel_config::ConfigError> {
    match path {
        Some(path) => ConfigLoader::load(path),
        None => ConfigLoader::load_or_default(&data_dir().join("config.toml")),
    }
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let command = cli.command.unwrap_or(Commands::Run);

    init_tracing(&config.logging, matches!(command, Commands::Run))?;

    match command {
        Commands::Run => run(config).await,
        Commands::Health => health(config).await,
        Commands::State { action } => handle_state_command(config, action).await,
        Commands::Config { action } => handle_config_command(&config, action),
    }
}

fn build_application(config: Config) -> Result<Application, keel_core::KernelError> {
    let app = Application::new(config);
    builtin::register_builtins(&app)?;
    Ok(app)
}

/// Run in the foreground until Ctrl+C or an internal shutdown request.
async fn run(config: Config) -> CliResult {
    info!("Starting Keel v{}", env!("CARGO_PKG_VERSION"));
    let app = build_application(config)?;
    let mut shutdown = app.shutdown_signal().subscribe();

    app.start().await?;
    for info in app.extensions().list() {
        info!("  {} v{} ({})", info.metadata.name, info.metadata.version, info.state);
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C");
        }
        _ = shutdown.recv() => {
            info!("Shutdown requested");
        }
    }

    info!("Shutting down...");
    app.stop().await?;
    Ok(())
}

/// Start the application, print its health report as JSON and stop it.
async fn health(config: Config) -> CliResult {
    let app = build_application(config)?;
    app.start().await?;
    let report = app.health_check().await;
    let stopped = app.stop().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    stopped?;
    if !report.status.is_healthy() {
        warn!("Application is {}", report.status);
    }
    Ok(())
}

async fn handle_state_command(config: Config, action: StateAction) -> CliResult {
    let state = StateManager::from_config(&config.state, None);
    state.load_state().await?;

    match action {
        StateAction::Get { key } => match state.get(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => {
                return Err(format!("No state entry '{}'", key).into());
            }
        },
        StateAction::List => {
            for key in state.keys() {
                let value = state.get(&key).unwrap_or(Value::Null);
                println!("{} = {}", key, value);
            }
        }
        StateAction::Set { key, value } => {
            require_persistence(&state)?;
            // Anything that is not valid JSON is stored as a string.
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            state.set(key, value, None).await?;
        }
        StateAction::Delete { key } => {
            require_persistence(&state)?;
            state.delete(key, None).await?;
        }
    }
    Ok(())
}

fn require_persistence(state: &StateManager) -> CliResult {
    if state.persistence_path().is_none() {
        return Err("State persistence is disabled; set [state] persistence = true".into());
    }
    Ok(())
}

fn handle_config_command(config: &Config, action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Validate => {
            let result = ConfigValidator::validate(config);
            for warning in &result.warnings {
                println!("warning: {}", warning);
            }
            for error in &result.errors {
                println!("error: {}", error);
            }
            if !result.is_valid() {
                return Err(format!("{} configuration error(s)", result.errors.len()).into());
            }
            println!("Configuration is valid");
        }
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}
