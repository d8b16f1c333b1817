//! The PTR rewriting pipeline (SPEC_FULL.md §4.5).
//!
//! The state machine itself is a direct transliteration of
//! `original_source/superpowers.py`'s `handle_request`: scope lookup, then
//! mode-dependent Power/upstream ordering, then fallback FQDN, then
//! NXDOMAIN. `Applicable` mirrors the source's `Powers.__call__` —
//! whether a Scope exists *and* has a non-empty Powers list.

use std::sync::Arc;

use crate::enums::{PTR_TYPE, Rcode};
use crate::ip_address::Address;
use crate::scope::{Mode, Nets};
use crate::upstream::UpstreamClient;
use crate::wire::{build_ptr_response, build_rcode_response, parse_question, read_rcode};

/// Handle one incoming datagram end to end: parse, consult Scope/Powers/
/// Upstream per SPEC_FULL.md §4.5, and return the raw response bytes.
pub async fn handle_request(
    request: &[u8],
    nets: Arc<Nets>,
    upstream: Arc<UpstreamClient>,
) -> crate::error::Result<Vec<u8>> {
    let query = parse_question(request)?;

    // Step 1: non-PTR queries bypass rewriting entirely.
    if query.qtype != PTR_TYPE {
        return upstream.forward(request).await;
    }

    // Step 2: resolve the scope for this address.
    let addr = Address::from_ptr_qname(&query.qname);
    let scope = addr.and_then(|a| nets.find(a).cloned());
    let applicable = scope.as_ref().map(|s| s.applicable()).unwrap_or(false);
    let mode = scope.as_ref().map(|s| s.mode).unwrap_or(Mode::Never);
    // `scope` is only ever `applicable` when `addr` resolved (scope lookup
    // requires a decoded address), so `addr.unwrap()` below is safe.

    // Step 3: mode first/always, if applicable, try Powers before upstream.
    if applicable && matches!(mode, Mode::First | Mode::Always) {
        if let Some(scope) = &scope {
            if let Some(fqdn) = try_powers(scope, addr.expect("applicable implies addr")).await {
                return build_ptr_response(&query, &fqdn);
            }
        }
    }

    // `always` never opens an upstream connection, applicable or not —
    // "always" means "never upstream", not "always rewrites"
    // (SPEC_FULL.md §9's resolution of the source's open question).
    if mode == Mode::Always {
        return fallback_or_nxdomain(&query, scope.as_ref());
    }

    // Step 4: forward upstream.
    let upstream_result = upstream.forward(request).await;
    let (upstream_bytes, upstream_rcode) = match &upstream_result {
        Ok(bytes) => match read_rcode(bytes) {
            Ok(rcode) => (Some(bytes.clone()), rcode),
            Err(_) => (None, 1),
        },
        Err(_) => (None, 1),
    };

    if !applicable || mode == Mode::Never {
        if let Some(bytes) = upstream_bytes {
            return Ok(bytes);
        }
        return fallback_or_nxdomain(&query, scope.as_ref());
    }

    if upstream_rcode == 0 {
        if let Some(bytes) = upstream_bytes {
            return Ok(bytes);
        }
    }

    // Step 5: mode last, upstream errored -> try Powers.
    if mode == Mode::Last {
        if let Some(scope) = &scope {
            if let Some(fqdn) = try_powers(scope, addr.expect("applicable implies addr")).await {
                return build_ptr_response(&query, &fqdn);
            }
        }
    }

    // Step 6/7: fallback FQDN, else NXDOMAIN.
    fallback_or_nxdomain(&query, scope.as_ref())
}

/// Await each Power's marshalling, then return the first non-empty
/// `query` result, stopping at the first hit (SPEC_FULL.md §4.5 step 3/5).
async fn try_powers(scope: &crate::scope::Scope, addr: Address) -> Option<String> {
    for power in &scope.powers {
        power.marshall().await;
    }
    for power in &scope.powers {
        let answer = power.query(addr).await;
        if !answer.is_empty() {
            return Some(answer);
        }
    }
    None
}

fn fallback_or_nxdomain(
    query: &crate::wire::ParsedQuery,
    scope: Option<&crate::scope::Scope>,
) -> crate::error::Result<Vec<u8>> {
    if let Some(scope) = scope {
        if scope.applicable() && !scope.fqdn().is_empty() {
            return build_ptr_response(query, scope.fqdn());
        }
    }
    build_rcode_response(query, Rcode::NameError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::sqlite::SqlitePower;
    use crate::power::PowerHandle;
    use crate::scope::Scope;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn make_ptr_request(qname: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0..2].copy_from_slice(&0x1234u16.to_be_bytes());
        buf[4..6].copy_from_slice(&1u16.to_be_bytes());
        for label in qname.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&PTR_TYPE.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf
    }

    /// A stub upstream resolver that always answers with the given RCODE,
    /// speaking the same length-prefixed framing as the real thing.
    async fn spawn_stub_upstream(rcode: u8) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut len_buf = [0u8; 2];
                    if stream.read_exact(&mut len_buf).await.is_err() {
                        return;
                    }
                    let len = u16::from_be_bytes(len_buf) as usize;
                    let mut req = vec![0u8; len];
                    if stream.read_exact(&mut req).await.is_err() {
                        return;
                    }
                    let mut response = req.clone();
                    response[3] = (response[3] & 0xF0) | (rcode & 0x0F);
                    let rlen = response.len() as u16;
                    let _ = stream.write_all(&rlen.to_be_bytes()).await;
                    let _ = stream.write_all(&response).await;
                });
            }
        });
        addr.ip().to_string()
    }

    async fn sqlite_power_with(db_entries: &[(&str, &str)]) -> PowerHandle {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite3");
        // Leak the tempdir so it outlives the power for the duration of the test.
        std::mem::forget(dir);
        let power = SqlitePower::new(db_path.to_str().unwrap()).await.unwrap();
        for (address, fqdn) in db_entries {
            sqlx::query("INSERT INTO Address (address, fqdn) VALUES (?, ?)")
                .bind(*address)
                .bind(*fqdn)
                .execute(power.pool())
                .await
                .unwrap();
        }
        PowerHandle::Sqlite(Arc::new(power))
    }

    #[tokio::test]
    async fn mode_always_never_opens_upstream() {
        // Point "upstream" at a port nothing is listening on; if the
        // pipeline tried to forward, this would surface as an error
        // instead of the expected fallback NXDOMAIN.
        let upstream = Arc::new(UpstreamClient::new("127.0.0.1:1".to_string(), false));
        let mut nets = Nets::new();
        let power = sqlite_power_with(&[]).await;
        nets.insert(
            "10.0.0.0/24".parse().unwrap(),
            Scope::new(24, Mode::Always, "", vec![power]),
        );
        let request = make_ptr_request("0.0.0.10.in-addr.arpa");
        let response = handle_request(&request, Arc::new(nets), upstream)
            .await
            .unwrap();
        assert_eq!(read_rcode(&response).unwrap(), 3); // NXDOMAIN
    }

    #[tokio::test]
    async fn mode_never_ignores_powers_and_returns_upstream_verbatim() {
        let host = spawn_stub_upstream(0).await;
        let upstream = Arc::new(UpstreamClient::new(host, false));
        let mut nets = Nets::new();
        let power = sqlite_power_with(&[("10.0.0.5", "should-not-be-used.local")]).await;
        nets.insert(
            "10.0.0.0/24".parse().unwrap(),
            Scope::new(24, Mode::Never, "", vec![power]),
        );
        let request = make_ptr_request("5.0.0.10.in-addr.arpa");
        let response = handle_request(&request, Arc::new(nets), upstream)
            .await
            .unwrap();
        assert_eq!(read_rcode(&response).unwrap(), 0);
    }

    #[tokio::test]
    async fn mode_first_uses_power_before_consulting_upstream() {
        let host = spawn_stub_upstream(0).await;
        let upstream = Arc::new(UpstreamClient::new(host, false));
        let mut nets = Nets::new();
        let power = sqlite_power_with(&[("10.0.0.5", "rewritten.local")]).await;
        nets.insert(
            "10.0.0.0/24".parse().unwrap(),
            Scope::new(24, Mode::First, "", vec![power]),
        );
        let request = make_ptr_request("5.0.0.10.in-addr.arpa");
        let response = handle_request(&request, Arc::new(nets), upstream)
            .await
            .unwrap();
        assert_eq!(read_rcode(&response).unwrap(), 0);
        assert!(response.len() > 12);
    }

    #[tokio::test]
    async fn mode_last_only_tries_powers_after_upstream_error() {
        let host = spawn_stub_upstream(2).await; // SERVFAIL
        let upstream = Arc::new(UpstreamClient::new(host, false));
        let mut nets = Nets::new();
        let power = sqlite_power_with(&[("10.0.0.5", "rewritten.local")]).await;
        nets.insert(
            "10.0.0.0/24".parse().unwrap(),
            Scope::new(24, Mode::Last, "", vec![power]),
        );
        let request = make_ptr_request("5.0.0.10.in-addr.arpa");
        let response = handle_request(&request, Arc::new(nets), upstream)
            .await
            .unwrap();
        assert_eq!(read_rcode(&response).unwrap(), 0);
    }
}
