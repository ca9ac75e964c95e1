//! Binary entry point for the Hetzner volume driver.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hetzner_volume_driver::plugin::{self, ServeError};
use hetzner_volume_driver::{
    ConfigError, DriverConfig, HetznerBackend, HetznerError, LinuxHost, VolumeDriver,
};

use cli::{Cli, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("backend error: {0}")]
    Backend(#[from] HetznerError),
    #[error("plugin server error: {0}")]
    Serve(#[from] ServeError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Serve(command) => serve(&command).await,
    }
}

async fn serve(command: &ServeCommand) -> Result<(), CliError> {
    let config = load_config(command)?;
    init_logging(&config)?;

    let backend = HetznerBackend::new(&config)?;
    let driver = VolumeDriver::new(backend, LinuxHost, &config);
    let socket = config.socket();
    info!(
        %socket,
        mount_root = %config.mount_root_path(),
        prefix = %config.name_prefix,
        protection = config.use_protection,
        "starting volume plugin"
    );
    plugin::serve(&socket, Arc::new(driver), shutdown_signal()).await?;
    Ok(())
}

fn load_config(command: &ServeCommand) -> Result<DriverConfig, CliError> {
    let mut config = DriverConfig::load_without_cli_args()?;
    apply_overrides(&mut config, command);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut DriverConfig, command: &ServeCommand) {
    if let Some(socket) = &command.socket {
        config.socket_path.clone_from(socket);
    }
    if let Some(root) = &command.mount_root {
        config.mount_root.clone_from(root);
    }
    if let Some(level) = &command.log_level {
        config.log_level.clone_from(level);
    }
}

fn init_logging(config: &DriverConfig) -> Result<(), CliError> {
    let level = config.log_filter_level()?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    let installed = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| CliError::Logging(err.to_string()))
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
