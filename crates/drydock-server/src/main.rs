//! drydock binary.
//!
//! `serve` runs the HTTP host (optionally in development mode), `dev`
//! supervises `serve --dev` and relaunches it after schema changes, and
//! `migrate` applies pending migrations once.

use clap::{Args, Parser, Subcommand};
use drydock_db::BackendResolver;
use drydock_server::bootstrap::{self, Runtime};
use drydock_server::config::{self, Config, DEFAULT_CONFIG_PATH};
use drydock_server::migrate::{self, MigrationOutcome};
use drydock_server::restart::{Supervisor, RESTART_EXIT_CODE};
use drydock_server::{app, init_tracing, AppState};
use drydock_watch::ProcessRunner;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "drydock", version, about = "Database-backed dev server with schema watching")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Path to the TOML config file.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the server.
    Serve {
        #[command(flatten)]
        config: ConfigArgs,
        /// Force development mode.
        #[arg(long)]
        dev: bool,
    },
    /// Run the server in development mode, relaunching it after schema changes.
    Dev {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Apply pending migrations and exit.
    Migrate {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn resolve_config_path(cli: Option<PathBuf>) -> (PathBuf, &'static str) {
    if let Some(path) = cli.filter(|p| !p.as_os_str().is_empty()) {
        return (path, "cli-arg");
    }

    if let Ok(path) = std::env::var("DRYDOCK_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (PathBuf::from(path), "env-var");
        }
    }

    (PathBuf::from(DEFAULT_CONFIG_PATH), "default")
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let (args, force_dev) = match &cli.command {
        Command::Serve { config, dev } => (config, *dev),
        Command::Dev { config } => (config, true),
        Command::Migrate { config } => (config, false),
    };
    let (config_path, config_source) = resolve_config_path(args.config.clone());

    let mut config = match config::load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("drydock: {e}");
            return ExitCode::FAILURE;
        }
    };
    if force_dev {
        config.project.development = true;
    }
    let generated_password = config.ensure_session_password();

    init_tracing(&config.logging);

    tracing::info!(
        source = config_source,
        path = %config_path.display(),
        "resolved startup configuration path"
    );

    match cli.command {
        Command::Dev { .. } => dev(config_path, &config, generated_password).await,
        Command::Serve { .. } => {
            if generated_password {
                tracing::warn!(
                    "no session password configured, using a generated one; \
                     set DRYDOCK_SESSION_PASSWORD to keep sessions across restarts"
                );
            }
            serve(config).await
        }
        Command::Migrate { .. } => migrate_once(&config).await,
    }
}

async fn serve(config: Config) -> ExitCode {
    let Runtime {
        resolver,
        watch,
        restart,
    } = match bootstrap::run(&config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let addr = config.bind_addr();
    let state = AppState {
        resolver,
        config: Arc::new(config),
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind, is another process using this port?");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(%addr, "starting drydock server");

    let mut restart_wait = restart.clone();
    let shutdown = async move {
        tokio::select! {
            () = shutdown_signal() => {}
            () = restart_wait.requested() => {
                tracing::info!("schema changed, shutting down for restart");
            }
        }
    };

    if let Err(e) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    if let Some(watch) = watch {
        watch.session.close();
        if let Err(e) = watch.task.await {
            tracing::warn!(error = %e, "schema watch task ended abnormally");
        }
    }

    if restart.is_requested() {
        tracing::info!("drydock server stopped, restart requested");
        exit_code(RESTART_EXIT_CODE)
    } else {
        tracing::info!("drydock server shut down");
        ExitCode::SUCCESS
    }
}

async fn dev(config_path: PathBuf, config: &Config, generated_password: bool) -> ExitCode {
    let program = match std::env::current_exe() {
        Ok(program) => program,
        Err(e) => {
            tracing::error!(error = %e, "cannot locate the drydock executable");
            return ExitCode::FAILURE;
        }
    };

    let mut supervisor = Supervisor::new(
        program,
        [
            OsString::from("serve"),
            OsString::from("--dev"),
            OsString::from("--config"),
            config_path.into_os_string(),
        ],
    );
    // Keep one generated session password across relaunches.
    if let Some(password) = config.session.password.as_ref().filter(|_| generated_password) {
        tracing::warn!(
            "no session password configured, using a generated one; \
             set DRYDOCK_SESSION_PASSWORD to keep sessions across restarts"
        );
        supervisor = supervisor.env("DRYDOCK_SESSION_PASSWORD", password.expose());
    }

    match supervisor.run().await {
        Ok(code) => exit_code(code),
        Err(e) => {
            tracing::error!(error = %e, "failed to launch the server");
            ExitCode::FAILURE
        }
    }
}

async fn migrate_once(config: &Config) -> ExitCode {
    let resolver = Arc::new(BackendResolver::new(config.resolver_settings(None)));
    let runner = ProcessRunner::with_timeout(config.command_timeout());

    match migrate::apply_pending(&resolver, config, &runner).await {
        Ok(MigrationOutcome::Applied { count }) => {
            tracing::info!(count, "applied database migrations");
            ExitCode::SUCCESS
        }
        Ok(MigrationOutcome::External { command }) => {
            tracing::info!(command, "applied database migrations");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "migration failed");
            ExitCode::FAILURE
        }
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
