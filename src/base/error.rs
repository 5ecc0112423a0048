use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Error produced while establishing a connection or driving a transaction.
///
/// Every stage of the establishment pipeline (resolve, dial, proxy handshake,
/// TLS handshake) surfaces its failures through this one type; platform error
/// types are translated at the boundary and never leak to callers.
#[derive(Debug, Error, Clone)]
pub enum DialError {
    /// The transport connect did not complete by the deadline. Also raised
    /// when the deadline is already in the past before any I/O is attempted.
    #[error("Connect timed out")]
    ConnectTimeout,
    #[error("SOCKS handshake timed out")]
    SocksHandshakeTimeout,
    #[error("HTTP proxy handshake timed out")]
    HttpProxyHandshakeTimeout,
    #[error("TLS handshake timed out")]
    TlsHandshakeTimeout,
    /// HTTP CONNECT returned a non-2xx status, or a SOCKS reply was malformed.
    #[error("Invalid proxy response: {0}")]
    InvalidProxyResponse(String),
    /// 407 from an HTTP proxy, or a SOCKS authentication failure.
    #[error("Proxy authentication required")]
    ProxyAuthenticationRequired,
    /// ALPN selected something other than `h2` or `http/1.1`.
    #[error("Server offered unsupported application protocol {0:?}")]
    UnsupportedApplicationProtocol(String),
    /// The channel went inactive before an expected event.
    #[error("Remote connection closed")]
    RemoteConnectionClosed,
    #[error("Request cancelled")]
    Cancelled,
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("TLS error: {0}")]
    Tls(String),
    /// Leaf transport failure carrying the raw OS error code where available.
    #[error("Socket error (os code {code:?})")]
    Posix {
        code: Option<i32>,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("DNS resolution for {domain} failed")]
    NameNotResolved {
        domain: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxyConfig(String),
}

impl DialError {
    /// Create a DNS resolution error with context.
    pub fn dns_failed(domain: impl Into<String>, source: io::Error) -> Self {
        Self::NameNotResolved {
            domain: domain.into(),
            source: Arc::new(source),
        }
    }

    /// Create a TLS failure with detail text.
    pub fn tls(detail: impl Into<String>) -> Self {
        Self::Tls(detail.into())
    }

    /// True for the stage-local and pipeline-level timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout
                | Self::SocksHandshakeTimeout
                | Self::HttpProxyHandshakeTimeout
                | Self::TlsHandshakeTimeout
                | Self::DeadlineExceeded
        )
    }
}

impl From<io::Error> for DialError {
    fn from(e: io::Error) -> Self {
        use io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => Self::ConnectTimeout,
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => Self::RemoteConnectionClosed,
            _ => Self::Posix {
                code: e.raw_os_error(),
                source: Arc::new(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn io_timeout_becomes_connect_timeout() {
        let err: DialError = Error::new(ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, DialError::ConnectTimeout));
        assert!(err.is_timeout());
    }

    #[test]
    fn io_eof_becomes_remote_connection_closed() {
        let err: DialError = Error::new(ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, DialError::RemoteConnectionClosed));
    }

    #[test]
    fn os_code_is_preserved() {
        let err: DialError = Error::from_raw_os_error(111).into();
        match err {
            DialError::Posix { code, .. } => assert_eq!(code, Some(111)),
            other => panic!("expected Posix, got {other:?}"),
        }
    }
}
