//! Command-line parsing (SPEC_FULL.md §10.4).
//!
//! Grounded on the teacher's `cli.rs`: the same declarative
//! `#[derive(Parser)]` style, but with positional arguments instead of a
//! `Commands` subcommand enum — the teacher's subcommands belong to its
//! multi-mode web/zone-management CLI, which this project doesn't have.
//! There is exactly one mode here: run the forwarder.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "superpowers",
    about = "A PTR-rewriting DNS forwarder",
    arg_required_else_help(false)
)]
pub struct Cli {
    /// Use DNS-over-TLS when talking to the upstream resolver.
    #[arg(long)]
    pub tls: bool,

    /// Path to the YAML configuration file. Defaults to `superpowers.yaml`
    /// next to the binary, or in the current directory.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Local address to bind the UDP listener to, e.g. `0.0.0.0:53`.
    pub udp_listen_address: String,

    /// The recursive resolver to forward non-PTR queries (and PTR misses)
    /// to, e.g. `1.1.1.1`.
    pub remote_server_address: String,
}
