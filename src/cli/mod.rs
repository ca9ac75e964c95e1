//! Command-line interface definitions for the `hetzner-volume-driver` binary.
//!
//! The parser structures live here so both the binary and the build script
//! can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `hetzner-volume-driver` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hetzner-volume-driver",
    about = "Docker volume plugin backed by Hetzner Cloud volumes",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Serve the Docker volume plugin protocol on a Unix socket.
    #[command(name = "serve", about = "Serve the Docker volume plugin protocol")]
    Serve(ServeCommand),
}

/// Arguments for the `serve` subcommand.
///
/// Every flag overrides the value loaded from configuration files and
/// `HETZNER_VOLUME_*` environment variables.
#[derive(Debug, Default, Parser)]
pub(crate) struct ServeCommand {
    /// Unix socket path Docker connects to.
    #[arg(long, value_name = "PATH")]
    pub(crate) socket: Option<String>,
    /// Propagated directory below which volumes are mounted.
    #[arg(long, value_name = "PATH")]
    pub(crate) mount_root: Option<String>,
    /// Log verbosity (trace, debug, info, warn or error).
    #[arg(long, value_name = "LEVEL")]
    pub(crate) log_level: Option<String>,
}
