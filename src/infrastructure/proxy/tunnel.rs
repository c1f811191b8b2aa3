//! Proxy Tunnels
//!
//! Dials a TCP stream to `host:port`, either directly or through the bound
//! proxy. TLS, when the endpoint needs it, is layered on top by the caller.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::domain::proxy::authority;
use crate::domain::{ProxyDescriptor, ProxyScheme};
use crate::shared::error::{ProxyError, TransportError};

/// Upper bound on the proxy's `CONNECT` response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a TCP stream to `host:port`, tunneled through `proxy` if given.
pub async fn dial(
    host: &str,
    port: u16,
    proxy: Option<&ProxyDescriptor>,
) -> Result<TcpStream, TransportError> {
    let Some(proxy) = proxy else {
        return Ok(TcpStream::connect((host, port)).await?);
    };

    debug!(proxy = %proxy, target = %authority(host, port), "Dialing through proxy");
    let stream = match proxy.scheme {
        ProxyScheme::Socks5 => {
            let target = lookup_host((host, port))
                .await?
                .next()
                .ok_or_else(|| TransportError::InvalidEndpoint {
                    endpoint: authority(host, port),
                    reason: "host did not resolve".into(),
                })?;
            socks5(proxy, target).await?
        }
        ProxyScheme::Socks5h => socks5(proxy, (host, port)).await?,
        ProxyScheme::Http => {
            let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
                .await
                .map_err(|e| ProxyError::unreachable(proxy, e))?;
            http_connect(&mut stream, host, port, proxy).await?;
            stream
        }
    };
    Ok(stream)
}

async fn socks5<'t, T>(proxy: &ProxyDescriptor, target: T) -> Result<TcpStream, ProxyError>
where
    T: tokio_socks::IntoTargetAddr<'t>,
{
    let proxy_addr = (proxy.host.as_str(), proxy.port);
    let stream = match &proxy.credentials {
        Some(creds) => {
            Socks5Stream::connect_with_password(
                proxy_addr,
                target,
                &creds.username,
                &creds.password,
            )
            .await
        }
        None => Socks5Stream::connect(proxy_addr, target).await,
    };
    stream
        .map(Socks5Stream::into_inner)
        .map_err(|e| ProxyError::unreachable(proxy, e))
}

/// Perform an HTTP `CONNECT` handshake on `stream`.
///
/// On success the stream is a raw tunnel to `host:port`. Any bytes the proxy
/// sends after the response head belong to the tunnel, so the head is read
/// one byte at a time.
pub async fn http_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    proxy: &ProxyDescriptor,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = authority(host, port);
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(creds) = &proxy.credentials {
        let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProxyError::unreachable(proxy, e))?;

    let head = read_response_head(stream)
        .await
        .map_err(|reason| ProxyError::unreachable(proxy, reason))?;
    let status = parse_status(&head).ok_or_else(|| {
        ProxyError::unreachable(proxy, format!("malformed CONNECT response: {head:?}"))
    })?;

    if !(200..300).contains(&status) {
        return Err(ProxyError::unreachable(
            proxy,
            format!("CONNECT refused with status {status}"),
        ));
    }
    Ok(())
}

async fn read_response_head<S>(stream: &mut S) -> Result<String, String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err("CONNECT response head too large".into());
        }
        match stream.read(&mut byte).await {
            Ok(0) => return Err("proxy closed the connection during CONNECT".into()),
            Ok(_) => head.push(byte[0]),
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Status code from `HTTP/1.x NNN reason`.
fn parse_status(head: &str) -> Option<u16> {
    let status_line = head.lines().next()?;
    let mut parts = status_line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
