//! Proxy configuration.

use crate::base::error::DialError;
use crate::socket::target::Target;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use zeroize::Zeroizing;

/// Proxy protocol kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// HTTP proxy; tunnels via CONNECT.
    Http,
    /// SOCKSv5 proxy (RFC 1928).
    Socks5,
}

/// Credentials presented to the proxy.
#[derive(Clone)]
pub enum ProxyAuthorization {
    /// Username/password. Used by the SOCKS5 sub-negotiation (RFC 1929) and
    /// by HTTP `Proxy-Authorization: Basic`.
    Basic {
        username: String,
        password: Zeroizing<String>,
    },
    /// Bearer token; HTTP proxies only.
    Bearer { token: Zeroizing<String> },
}

impl ProxyAuthorization {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: Zeroizing::new(token.into()),
        }
    }

    /// `Proxy-Authorization` header value.
    pub(crate) fn header_value(&self) -> String {
        match self {
            Self::Basic { username, password } => {
                let credentials = format!("{}:{}", username, password.as_str());
                format!("Basic {}", general_purpose::STANDARD.encode(credentials))
            }
            Self::Bearer { token } => format!("Bearer {}", token.as_str()),
        }
    }

    /// Username/password pair for the SOCKS5 sub-negotiation.
    pub(crate) fn basic_credentials(&self) -> Option<(&str, &str)> {
        match self {
            Self::Basic { username, password } => Some((username.as_str(), password.as_str())),
            Self::Bearer { .. } => None,
        }
    }
}

impl fmt::Debug for ProxyAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
        }
    }
}

/// A configured proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub authorization: Option<ProxyAuthorization>,
}

impl ProxyConfig {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Http,
            host: host.into(),
            port,
            authorization: None,
        }
    }

    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Socks5,
            host: host.into(),
            port,
            authorization: None,
        }
    }

    /// Attach credentials. Bearer tokens are only meaningful to HTTP proxies
    /// and are rejected for SOCKS.
    pub fn with_authorization(
        mut self,
        authorization: ProxyAuthorization,
    ) -> Result<Self, DialError> {
        if self.kind == ProxyKind::Socks5
            && matches!(authorization, ProxyAuthorization::Bearer { .. })
        {
            return Err(DialError::InvalidProxyConfig(
                "SOCKS5 proxies do not support bearer tokens".into(),
            ));
        }
        self.authorization = Some(authorization);
        Ok(self)
    }

    /// Read proxy settings from the conventional environment variables,
    /// checking `HTTPS_PROXY`, `HTTP_PROXY` and `ALL_PROXY` in that order.
    pub fn from_env() -> Option<Self> {
        let url_str = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy", "ALL_PROXY"]
            .iter()
            .find_map(|name| std::env::var(name).ok())?;
        let url = Url::parse(&url_str).ok()?;

        let kind = match url.scheme() {
            "socks5" | "socks5h" => ProxyKind::Socks5,
            _ => ProxyKind::Http,
        };
        let host = url.host_str()?.to_string();
        let port = url.port().unwrap_or(match kind {
            ProxyKind::Http => 80,
            ProxyKind::Socks5 => 1080,
        });

        let authorization = match (url.username(), url.password()) {
            ("", _) => None,
            (user, pass) => Some(ProxyAuthorization::basic(user, pass.unwrap_or(""))),
        };

        Some(Self {
            kind,
            host,
            port,
            authorization,
        })
    }

    /// Reject target/proxy combinations that cannot work before any I/O:
    /// SOCKS has no address type for filesystem sockets.
    pub(crate) fn validate_target(&self, target: &Target) -> Result<(), DialError> {
        if self.kind == ProxyKind::Socks5 && matches!(target, Target::UnixSocket(_)) {
            return Err(DialError::InvalidProxyConfig(
                "SOCKS proxies cannot tunnel to Unix socket targets".into(),
            ));
        }
        Ok(())
    }
}
