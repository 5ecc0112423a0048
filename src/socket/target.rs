//! Destination normalisation: schemes, targets, and the pool key that
//! defines connection reusability.

use crate::base::error::DialError;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use url::Url;

/// Request scheme, including the Unix-socket variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    HttpUnix,
    HttpsUnix,
    Unix,
}

impl Scheme {
    pub fn parse(scheme: &str) -> Result<Self, DialError> {
        match scheme {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "http+unix" => Ok(Self::HttpUnix),
            "https+unix" => Ok(Self::HttpsUnix),
            "unix" => Ok(Self::Unix),
            other => Err(DialError::InvalidTarget(format!(
                "unsupported scheme {other:?}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::HttpUnix => "http+unix",
            Self::HttpsUnix => "https+unix",
            Self::Unix => "unix",
        }
    }

    /// True when the connection runs TLS.
    pub fn uses_tls(self) -> bool {
        matches!(self, Self::Https | Self::HttpsUnix)
    }

    /// True for schemes that may be routed through a proxy.
    pub fn proxyable(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
            // Unix sockets have no port; the value is never dialed.
            Self::HttpUnix | Self::HttpsUnix | Self::Unix => 0,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised destination of a connection.
///
/// `Domain` never holds an IP literal; [`Target::new`] classifies bracketed
/// IPv6 and dotted-quad hosts as `IpAddress`. Domain names are lowercased
/// ASCII (non-ASCII input is punycoded by the caller).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    IpAddress(IpAddr, u16),
    Domain(String, u16),
    UnixSocket(PathBuf),
}

impl Target {
    /// Classify a URL host into an IP or domain target.
    pub fn new(host: &str, port: u16) -> Self {
        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Target::IpAddress(ip, port);
        }
        Target::Domain(host.to_ascii_lowercase(), port)
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Target::IpAddress(_, port) | Target::Domain(_, port) => Some(*port),
            Target::UnixSocket(_) => None,
        }
    }

    /// `host:port` form for CONNECT authorities and Host headers. IPv6
    /// addresses are bracketed. Unix targets have no authority.
    pub fn authority(&self) -> Option<String> {
        match self {
            Target::IpAddress(IpAddr::V6(ip), port) => Some(format!("[{ip}]:{port}")),
            Target::IpAddress(IpAddr::V4(ip), port) => Some(format!("{ip}:{port}")),
            Target::Domain(host, port) => Some(format!("{host}:{port}")),
            Target::UnixSocket(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::UnixSocket(path) => write!(f, "{}", path.display()),
            other => f.write_str(&other.authority().unwrap_or_default()),
        }
    }
}

/// Identity of a reusable connection.
///
/// Two requests may share a connection iff their pool keys are equal; path,
/// query, headers and body never participate. The SNI override is kept
/// separate from the target so a caller can dial an IP while presenting a
/// domain name to the server. The TLS fingerprint is the structural hash of a
/// per-request TLS override, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: Scheme,
    pub target: Target,
    pub sni_override: Option<String>,
    pub tls_fingerprint: Option<u64>,
}

impl PoolKey {
    /// Build the key for a request URL.
    pub fn from_url(url: &Url, sni_override: Option<&str>) -> Result<Self, DialError> {
        let scheme = Scheme::parse(url.scheme())?;
        let target = match scheme {
            Scheme::HttpUnix | Scheme::HttpsUnix | Scheme::Unix => {
                // The socket path travels percent-encoded in the host
                // component, e.g. `http+unix://%2Ftmp%2Fapp.sock/status`.
                let host = url.host_str().ok_or_else(|| {
                    DialError::InvalidTarget("unix URL is missing an encoded socket path".into())
                })?;
                let path = percent_decode_str(host).decode_utf8().map_err(|_| {
                    DialError::InvalidTarget("unix socket path is not valid UTF-8".into())
                })?;
                Target::UnixSocket(PathBuf::from(path.into_owned()))
            }
            Scheme::Http | Scheme::Https => {
                let host = url
                    .host_str()
                    .ok_or_else(|| DialError::InvalidTarget("URL has no host".into()))?;
                let port = url.port().unwrap_or_else(|| scheme.default_port());
                Target::new(host, port)
            }
        };

        Ok(Self {
            scheme,
            target,
            sni_override: sni_override.map(str::to_owned),
            tls_fingerprint: None,
        })
    }

    /// Attach the structural hash of a per-request TLS override.
    pub fn with_tls_fingerprint(mut self, fingerprint: u64) -> Self {
        self.tls_fingerprint = Some(fingerprint);
        self
    }
}
