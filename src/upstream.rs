//! The upstream TCP/TLS client (SPEC_FULL.md §4.4).
//!
//! Grounded on the teacher's `servers.rs::tcp_conn_handler` for the
//! length-prefixed read-loop shape (this is "the fixed variant" per
//! SPEC_FULL.md §9: a short read before the declared length is fully
//! drained is always treated as a connection error, never a silent
//! truncation), and on `original_source/superpowers.py`'s `handle_request`
//! for the overall connect-write-read-close sequence.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use crate::error::{Result, SuperpowersError};

const PLAIN_PORT: u16 = 53;
const TLS_PORT: u16 = 853;
/// Bounds the upstream round trip; on expiry this is treated as an upstream
/// failure (SPEC_FULL.md §5).
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Clone)]
pub struct UpstreamClient {
    remote: String,
    use_tls: bool,
    tls_config: Option<Arc<ClientConfig>>,
}

impl UpstreamClient {
    pub fn new(remote: String, use_tls: bool) -> Self {
        let tls_config = if use_tls {
            let mut roots = tokio_rustls::rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Some(Arc::new(config))
        } else {
            None
        };
        UpstreamClient {
            remote,
            use_tls,
            tls_config,
        }
    }

    /// Forward `request` to the configured recursive resolver and return
    /// its raw response bytes.
    pub async fn forward(&self, request: &[u8]) -> Result<Vec<u8>> {
        tokio::time::timeout(UPSTREAM_TIMEOUT, self.forward_inner(request))
            .await
            .map_err(|_| SuperpowersError::Upstream("upstream request timed out".to_string()))?
    }

    async fn forward_inner(&self, request: &[u8]) -> Result<Vec<u8>> {
        if self.use_tls {
            self.forward_tls(request).await
        } else {
            self.forward_plain(request).await
        }
    }

    async fn forward_plain(&self, request: &[u8]) -> Result<Vec<u8>> {
        let addr = format!("{}:{}", self.remote, PLAIN_PORT);
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| SuperpowersError::Upstream(format!("connect to {addr} failed: {e}")))?;
        write_framed(&mut stream, request).await?;
        read_framed(&mut stream).await
    }

    async fn forward_tls(&self, request: &[u8]) -> Result<Vec<u8>> {
        let addr = format!("{}:{}", self.remote, TLS_PORT);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| SuperpowersError::Upstream(format!("connect to {addr} failed: {e}")))?;
        let config = self
            .tls_config
            .clone()
            .expect("tls_config is Some whenever use_tls is true");
        let connector = TlsConnector::from(config);
        let server_name = ServerName::try_from(self.remote.clone())
            .map_err(|e| SuperpowersError::Tls(format!("invalid server name {:?}: {e}", self.remote)))?;
        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| SuperpowersError::Tls(format!("TLS handshake failed: {e}")))?;
        write_framed(&mut stream, request).await?;
        read_framed(&mut stream).await
    }
}

async fn write_framed<W: AsyncWriteExt + Unpin>(writer: &mut W, request: &[u8]) -> Result<()> {
    let len = u16::try_from(request.len())
        .map_err(|_| SuperpowersError::Upstream("request too large for TCP framing".to_string()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| SuperpowersError::Upstream(format!("write failed: {e}")))?;
    writer
        .write_all(request)
        .await
        .map_err(|e| SuperpowersError::Upstream(format!("write failed: {e}")))?;
    Ok(())
}

/// Read a 2-byte big-endian length prefix, then read exactly that many
/// bytes, looping until fully drained. A short read (EOF before the
/// declared length is reached) is always an error.
async fn read_framed<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| SuperpowersError::Upstream(format!("failed to read response length: {e}")))?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| SuperpowersError::Upstream(format!("short read from upstream: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_framed_drains_exact_length_even_across_short_reads() {
        let (mut client, mut server) = duplex(4);
        let payload = b"hello world, this is longer than the duplex buffer".to_vec();
        let len = payload.len() as u16;
        tokio::spawn(async move {
            server.write_all(&len.to_be_bytes()).await.unwrap();
            server.write_all(&payload).await.unwrap();
        });
        let got = read_framed(&mut client).await.unwrap();
        assert_eq!(got.len(), len as usize);
    }

    #[tokio::test]
    async fn read_framed_errors_on_truncated_message() {
        let (mut client, mut server) = duplex(64);
        tokio::spawn(async move {
            server.write_all(&10u16.to_be_bytes()).await.unwrap();
            server.write_all(b"short").await.unwrap();
            // drop server, closing the connection before 10 bytes arrive
        });
        let result = read_framed(&mut client).await;
        assert!(result.is_err());
    }
}
