//! Process bootstrap (SPEC_FULL.md §10.4).
//!
//! Grounded on the teacher's `main.rs`/`cli.rs` lifecycle: parse the CLI,
//! load and validate configuration eagerly, build the Scope Database and
//! Powers, bind the UDP socket, spawn the listener, and await
//! `tokio::signal::ctrl_c()` for a clean shutdown — simplified to this
//! project's single long-running listener rather than the teacher's
//! multi-server fleet (udpserver/tcpserver/apiserver/datastore).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use superpowers::cli::Cli;
use superpowers::config;
use superpowers::logging;
use superpowers::servers::udp_server;
use superpowers::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let cfg = match config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(error) => {
            error!(%error, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let nets = match cfg.build_scope_database().await {
        Ok(nets) => Arc::new(nets),
        Err(error) => {
            error!(%error, "failed to build scope database");
            return ExitCode::FAILURE;
        }
    };

    let upstream = Arc::new(UpstreamClient::new(
        cli.remote_server_address.clone(),
        cli.tls,
    ));

    let listen_address = cli.udp_listen_address.clone();
    let listener = tokio::spawn(async move { udp_server(&listen_address, nets, upstream).await });

    tokio::select! {
        result = listener => {
            match result {
                Ok(Ok(())) => {
                    info!("UDP listener exited cleanly");
                    ExitCode::SUCCESS
                }
                Ok(Err(error)) => {
                    error!(%error, "UDP listener failed");
                    ExitCode::FAILURE
                }
                Err(error) => {
                    error!(%error, "UDP listener task panicked");
                    ExitCode::FAILURE
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            ExitCode::SUCCESS
        }
    }
}
