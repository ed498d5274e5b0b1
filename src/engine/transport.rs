//! Candidate dialing
//!
//! Establishes a tunnel to a target host/port through a candidate proxy,
//! speaking the candidate's own protocol.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_socks::tcp::{socks4::Socks4Stream, Socks5Stream};
use tracing::debug;

use crate::error::{EgretError, Result};
use crate::models::{ProxyProtocol, ProxyRecord};

/// Connect to a target through the candidate proxy
///
/// The returned stream is a transparent byte pipe to the target.
pub async fn connect(record: &ProxyRecord, target_host: &str, target_port: u16) -> Result<TcpStream> {
    match record.protocol {
        ProxyProtocol::Http | ProxyProtocol::Https => {
            connect_http(record, target_host, target_port).await
        }
        ProxyProtocol::Socks4 => connect_socks4(record, target_host, target_port).await,
        ProxyProtocol::Socks5 => connect_socks5(record, target_host, target_port).await,
    }
}

/// Tunnel through an HTTP proxy with the CONNECT method
async fn connect_http(
    record: &ProxyRecord,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    debug!("Connecting to HTTP proxy at {}", record.address());

    let mut stream = TcpStream::connect(record.address())
        .await
        .map_err(|e| EgretError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

    let request = format!(
        "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
        target_host, target_port, target_host, target_port
    );

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| EgretError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e)))?;

    let mut response = vec![0u8; 1024];
    let n = stream.read(&mut response).await.map_err(|e| {
        EgretError::ProxyConnectionFailed(format!("Failed to read CONNECT response: {}", e))
    })?;
    if n == 0 {
        return Err(EgretError::ProxyConnectionFailed(
            "empty CONNECT response".to_string(),
        ));
    }

    let response_str = String::from_utf8_lossy(&response[..n]);
    if !response_str.starts_with("HTTP/1.1 200") && !response_str.starts_with("HTTP/1.0 200") {
        return Err(EgretError::ProxyConnectionFailed(format!(
            "CONNECT failed: {}",
            response_str.lines().next().unwrap_or("Unknown error")
        )));
    }

    debug!("HTTP CONNECT tunnel established via {}", record.address());
    Ok(stream)
}

/// Connect through a SOCKS4 proxy
///
/// SOCKS4 carries a raw IPv4 address, so the target hostname is resolved
/// locally first.
async fn connect_socks4(
    record: &ProxyRecord,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    debug!("Connecting to SOCKS4 proxy at {}", record.address());

    let proxy_addr = parse_proxy_addr(record)?;

    let target_addr = lookup_host((target_host, target_port))
        .await
        .map_err(|e| EgretError::ProxyConnectionFailed(format!("target resolve failed: {}", e)))?
        .find(|a| a.is_ipv4())
        .ok_or_else(|| {
            EgretError::ProxyConnectionFailed(format!("no IPv4 address for {}", target_host))
        })?;

    let stream = Socks4Stream::connect(proxy_addr, target_addr)
        .await
        .map_err(|e| EgretError::ProxyConnectionFailed(format!("SOCKS4 connect failed: {}", e)))?;

    debug!("SOCKS4 connection established via {}", record.address());
    Ok(stream.into_inner())
}

/// Connect through a SOCKS5 proxy; the proxy resolves the target name
async fn connect_socks5(
    record: &ProxyRecord,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream> {
    debug!("Connecting to SOCKS5 proxy at {}", record.address());

    let proxy_addr = parse_proxy_addr(record)?;

    let stream = Socks5Stream::connect(proxy_addr, (target_host, target_port))
        .await
        .map_err(|e| EgretError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e)))?;

    debug!("SOCKS5 connection established via {}", record.address());
    Ok(stream.into_inner())
}

fn parse_proxy_addr(record: &ProxyRecord) -> Result<std::net::SocketAddr> {
    record
        .address()
        .parse()
        .map_err(|_| EgretError::InvalidProxyAddress(record.address()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;

    fn record(host: &str, protocol: ProxyProtocol) -> ProxyRecord {
        ProxyRecord {
            host: host.to_string(),
            port: 1080,
            protocol,
            country: "US".to_string(),
            latency_ms: 100,
            last_checked: None,
            favorite: false,
        }
    }

    #[test]
    fn test_parse_proxy_addr() {
        let good = record("127.0.0.1", ProxyProtocol::Socks5);
        assert!(parse_proxy_addr(&good).is_ok());

        let bad = record("not an address", ProxyProtocol::Socks5);
        assert!(matches!(
            parse_proxy_addr(&bad),
            Err(EgretError::InvalidProxyAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transient_failure() {
        // Port 1 on localhost is almost certainly closed
        let mut candidate = record("127.0.0.1", ProxyProtocol::Http);
        candidate.port = 1;

        let err = connect(&candidate, "example.com", 80).await.unwrap_err();
        assert!(err.is_transient());
    }
}
