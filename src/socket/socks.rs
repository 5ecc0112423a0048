//! SOCKSv5 proxy negotiation (RFC 1928, with RFC 1929 username/password
//! sub-negotiation).
//!
//! Domain targets are passed to the proxy by name; the proxy resolves them.
//! Resolver results are never substituted for the original target.

use crate::base::deadline::ConnectionDeadline;
use crate::base::error::DialError;
use crate::socket::proxy::ProxyAuthorization;
use crate::socket::stream::Channel;
use crate::socket::target::Target;
use std::net::IpAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout_at;

const SOCKS_VERSION: u8 = 0x05;
const AUTH_SUBNEGOTIATION_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Negotiate a SOCKS5 tunnel to `target` over `channel`.
///
/// Runs under the pipeline deadline, failing with `SocksHandshakeTimeout`
/// when it fires first.
pub async fn tunnel(
    channel: &mut Channel,
    target: &Target,
    authorization: Option<&ProxyAuthorization>,
    deadline: ConnectionDeadline,
) -> Result<(), DialError> {
    deadline.remaining().map_err(|_| DialError::SocksHandshakeTimeout)?;
    match timeout_at(deadline.instant(), handshake(channel, target, authorization)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(%target, "SOCKS5 handshake hit the pipeline deadline");
            Err(DialError::SocksHandshakeTimeout)
        }
    }
}

async fn handshake(
    channel: &mut Channel,
    target: &Target,
    authorization: Option<&ProxyAuthorization>,
) -> Result<(), DialError> {
    let credentials = authorization.and_then(|auth| auth.basic_credentials());

    // Greeting: offer no-auth, plus username/password when configured.
    let greeting: &[u8] = if credentials.is_some() {
        &[SOCKS_VERSION, 0x02, METHOD_NO_AUTH, METHOD_USERNAME_PASSWORD]
    } else {
        &[SOCKS_VERSION, 0x01, METHOD_NO_AUTH]
    };
    channel.write_all(greeting).await?;

    let mut selection = [0u8; 2];
    channel.read_exact(&mut selection).await.map_err(eof_is_closed)?;
    if selection[0] != SOCKS_VERSION {
        return Err(DialError::InvalidProxyResponse(format!(
            "proxy answered with SOCKS version {}",
            selection[0]
        )));
    }
    match selection[1] {
        METHOD_NO_AUTH => {}
        METHOD_USERNAME_PASSWORD => {
            let (username, password) =
                credentials.ok_or(DialError::ProxyAuthenticationRequired)?;
            negotiate_credentials(channel, username, password).await?;
        }
        METHOD_NO_ACCEPTABLE => return Err(DialError::ProxyAuthenticationRequired),
        other => {
            return Err(DialError::InvalidProxyResponse(format!(
                "proxy selected unsupported auth method {other:#04x}"
            )))
        }
    }

    // CONNECT request. Domains go through by name so the proxy resolves.
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match target {
        Target::Domain(host, port) => {
            if host.len() > 255 {
                return Err(DialError::InvalidTarget(
                    "domain name exceeds 255 octets".into(),
                ));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
            request.extend_from_slice(&port.to_be_bytes());
        }
        Target::IpAddress(IpAddr::V4(ip), port) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
            request.extend_from_slice(&port.to_be_bytes());
        }
        Target::IpAddress(IpAddr::V6(ip), port) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
            request.extend_from_slice(&port.to_be_bytes());
        }
        Target::UnixSocket(_) => {
            return Err(DialError::InvalidProxyConfig(
                "SOCKS proxies cannot tunnel to Unix socket targets".into(),
            ))
        }
    }
    channel.write_all(&request).await?;

    // Reply: VER REP RSV ATYP BND.ADDR BND.PORT.
    let mut reply = [0u8; 4];
    channel.read_exact(&mut reply).await.map_err(eof_is_closed)?;
    if reply[0] != SOCKS_VERSION {
        return Err(DialError::InvalidProxyResponse(format!(
            "proxy answered with SOCKS version {}",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(DialError::InvalidProxyResponse(format!(
            "CONNECT rejected: {}",
            reply_reason(reply[1])
        )));
    }

    // Drain the bound address; its exact length depends on the address type.
    let remaining = match reply[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            channel.read_exact(&mut len).await.map_err(eof_is_closed)?;
            len[0] as usize + 2
        }
        other => {
            return Err(DialError::InvalidProxyResponse(format!(
                "reply carries unknown address type {other:#04x}"
            )))
        }
    };
    let mut bound = vec![0u8; remaining];
    channel.read_exact(&mut bound).await.map_err(eof_is_closed)?;

    tracing::debug!(%target, "SOCKS5 tunnel established");
    Ok(())
}

/// RFC 1929 username/password sub-negotiation.
async fn negotiate_credentials(
    channel: &mut Channel,
    username: &str,
    password: &str,
) -> Result<(), DialError> {
    if username.len() > 255 || password.len() > 255 {
        return Err(DialError::InvalidProxyConfig(
            "SOCKS5 credentials exceed 255 octets".into(),
        ));
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(AUTH_SUBNEGOTIATION_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    channel.write_all(&request).await?;

    let mut response = [0u8; 2];
    channel.read_exact(&mut response).await.map_err(eof_is_closed)?;
    if response[0] != AUTH_SUBNEGOTIATION_VERSION {
        return Err(DialError::InvalidProxyResponse(format!(
            "auth sub-negotiation answered with version {}",
            response[0]
        )));
    }
    if response[1] != 0x00 {
        return Err(DialError::ProxyAuthenticationRequired);
    }
    Ok(())
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    }
}

fn eof_is_closed(e: std::io::Error) -> DialError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        DialError::RemoteConnectionClosed
    } else {
        e.into()
    }
}
