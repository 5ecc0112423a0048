//! HTTP CONNECT proxy negotiation.
//!
//! Given an established plain channel to the proxy, sends a CONNECT request
//! for the real target's authority and parses the response head. Success
//! turns the channel into an opaque end-to-end tunnel.

use crate::base::deadline::ConnectionDeadline;
use crate::base::error::DialError;
use crate::socket::proxy::ProxyAuthorization;
use crate::socket::stream::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout_at;

const MAX_RESPONSE_HEAD: usize = 8192;

/// Negotiate a CONNECT tunnel to `authority` over `channel`.
///
/// Runs under the pipeline deadline; if it fires before the tunnel is
/// established the handshake fails with `HttpProxyHandshakeTimeout` and the
/// channel is unusable.
pub async fn tunnel(
    channel: &mut Channel,
    authority: &str,
    authorization: Option<&ProxyAuthorization>,
    deadline: ConnectionDeadline,
) -> Result<(), DialError> {
    deadline.remaining().map_err(|_| DialError::HttpProxyHandshakeTimeout)?;
    match timeout_at(deadline.instant(), handshake(channel, authority, authorization)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(authority, "CONNECT handshake hit the pipeline deadline");
            Err(DialError::HttpProxyHandshakeTimeout)
        }
    }
}

async fn handshake(
    channel: &mut Channel,
    authority: &str,
    authorization: Option<&ProxyAuthorization>,
) -> Result<(), DialError> {
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = authorization {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", auth.header_value()));
    }
    request.push_str("\r\n");

    channel.write_all(request.as_bytes()).await?;
    tracing::trace!(authority, "CONNECT request sent");

    // The proxy may start forwarding tunnel bytes immediately after the
    // blank line, so the head is read one byte at a time; anything past the
    // terminator must stay in the channel untouched.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = channel.read(&mut byte).await?;
        if n == 0 {
            return Err(DialError::RemoteConnectionClosed);
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(DialError::InvalidProxyResponse(
                "CONNECT response head exceeded 8 KiB".into(),
            ));
        }
    }

    match parse_status_line(&head)? {
        status @ 200..=299 => {
            tracing::debug!(authority, status, "CONNECT tunnel established");
            Ok(())
        }
        407 => Err(DialError::ProxyAuthenticationRequired),
        status => Err(DialError::InvalidProxyResponse(format!(
            "CONNECT returned status {status}"
        ))),
    }
}

fn parse_status_line(head: &[u8]) -> Result<u16, DialError> {
    let line_end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or_else(|| DialError::InvalidProxyResponse("missing status line".into()))?;
    let line = std::str::from_utf8(&head[..line_end])
        .map_err(|_| DialError::InvalidProxyResponse("status line is not UTF-8".into()))?;

    let mut parts = line.splitn(3, ' ');
    match parts.next() {
        Some(version) if version.starts_with("HTTP/") => {}
        _ => {
            return Err(DialError::InvalidProxyResponse(format!(
                "malformed status line {line:?}"
            )))
        }
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| DialError::InvalidProxyResponse(format!("malformed status line {line:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_200() {
        let status =
            parse_status_line(b"HTTP/1.1 200 Connection established\r\n\r\n").unwrap();
        assert_eq!(status, 200);
    }

    #[test]
    fn parses_a_status_without_reason_phrase() {
        assert_eq!(parse_status_line(b"HTTP/1.0 407\r\n\r\n").unwrap(), 407);
    }

    #[test]
    fn rejects_non_http_preambles() {
        assert!(matches!(
            parse_status_line(b"SSH-2.0-OpenSSH\r\n\r\n"),
            Err(DialError::InvalidProxyResponse(_))
        ));
    }

    #[test]
    fn rejects_garbage_status_codes() {
        assert!(matches!(
            parse_status_line(b"HTTP/1.1 abc Bad\r\n\r\n"),
            Err(DialError::InvalidProxyResponse(_))
        ));
    }
}
