//! The UDP listener (SPEC_FULL.md §5).
//!
//! Grounded on the teacher's `servers.rs::udp_server`: bind, loop on
//! `recv_from` into a fixed `UDP_BUFFER_SIZE` buffer, wrap each query in a
//! `REPLY_TIMEOUT_MS` timeout, send the response back to the query's
//! address. Unlike the teacher, every datagram is additionally gated by a
//! `MAX_IN_FLIGHT`-permit semaphore around task spawn, per the REDESIGN
//! FLAG in SPEC_FULL.md §9: the source placed no bound on concurrent
//! in-flight queries.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::{Result, SuperpowersError};
use crate::pipeline::handle_request;
use crate::scope::Nets;
use crate::upstream::UpstreamClient;
use crate::{MAX_IN_FLIGHT, REPLY_TIMEOUT_MS, UDP_BUFFER_SIZE};

/// Bind and run the UDP listener until the socket errors out or the process
/// is asked to shut down.
pub async fn udp_server(
    listen_address: &str,
    nets: Arc<Nets>,
    upstream: Arc<UpstreamClient>,
) -> Result<()> {
    let sock = UdpSocket::bind(listen_address)
        .await
        .map_err(SuperpowersError::Bind)?;
    tracing::info!("Started UDP listener on {listen_address}");

    let sock = Arc::new(sock);
    let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];

    loop {
        let (len, addr) = match sock.recv_from(&mut buf).await {
            Ok(value) => value,
            Err(error) => {
                error!(%error, "error receiving UDP datagram");
                continue;
            }
        };
        debug!(bytes = len, %addr, "received UDP datagram");
        let request = buf[..len].to_vec();

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(SuperpowersError::PowerInternal(
                    "in-flight query semaphore closed".to_string(),
                ));
            }
        };

        let sock = sock.clone();
        let nets = nets.clone();
        let upstream = upstream.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let result = timeout(
                Duration::from_millis(REPLY_TIMEOUT_MS),
                handle_request(&request, nets, upstream),
            )
            .await;

            let response = match result {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(error)) => {
                    warn!(%error, %addr, "pipeline failed to build a response");
                    return;
                }
                Err(_) => {
                    warn!(%addr, "pipeline timed out, dropping query");
                    return;
                }
            };

            if let Err(error) = sock.send_to(&response, addr).await {
                error!(%error, %addr, "failed to send response");
            }
        });
    }
}
