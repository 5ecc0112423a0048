//! Client configuration surface consumed by the connection factory.

use crate::base::error::DialError;
use crate::dns::Resolve;
use crate::socket::proxy::ProxyConfig;
use crate::socket::stream::Channel;
use crate::socket::tls::TlsOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which HTTP versions to advertise during ALPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpVersionPolicy {
    /// Advertise `h2` and `http/1.1`, in that preference order.
    #[default]
    Auto,
    /// Advertise `http/1.1` only; `h2` is never offered.
    Http1Only,
}

/// Response decompression policy. Opaque to the connection core; handed to
/// the HTTP layer together with the started connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decompression {
    #[default]
    Disabled,
    Enabled {
        /// Maximum allowed decompressed-to-compressed size ratio.
        limit_ratio: usize,
    },
}

/// Hook run on the raw socket between creation and connect.
pub type SocketConfigurator = Arc<dyn Fn(&socket2::Socket) -> std::io::Result<()> + Send + Sync>;

/// Hook run on a negotiated channel right before protocol start; an error
/// fails the connection creation.
pub type ChannelInitializer = Arc<dyn Fn(&Channel) -> Result<(), DialError> + Send + Sync>;

/// Configuration for connection establishment.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Proxy for `http`/`https` schemes. Unix-socket schemes never proxy.
    pub proxy: Option<ProxyConfig>,
    /// Default TLS parameters; per-request overrides key separate pool
    /// entries via their structural fingerprint.
    pub tls: TlsOptions,
    pub http_version: HttpVersionPolicy,
    /// Dial with MPTCP where the platform supports it.
    pub enable_multipath: bool,
    /// Park failed dials on network-down/unreachable errors and retry until
    /// the deadline instead of failing immediately.
    pub wait_for_connectivity: bool,
    /// Custom resolver; the platform default (getaddrinfo) when unset.
    pub dns_resolver: Option<Arc<dyn Resolve>>,
    pub tcp_keepalive: Option<Duration>,
    pub tcp_nodelay: bool,
    pub socket_configurator: Option<SocketConfigurator>,
    pub http1_debug_initializer: Option<ChannelInitializer>,
    pub http2_debug_initializer: Option<ChannelInitializer>,
    /// Per-stream variant, handed to the HTTP layer with the connection.
    pub http2_stream_debug_initializer: Option<ChannelInitializer>,
    /// HTTP/2 connection lifetime cap, enforced by the HTTP layer.
    pub maximum_uses_per_connection: Option<u32>,
    pub decompression: Decompression,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            tcp_nodelay: true,
            ..Default::default()
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("proxy", &self.proxy)
            .field("tls", &self.tls)
            .field("http_version", &self.http_version)
            .field("enable_multipath", &self.enable_multipath)
            .field("wait_for_connectivity", &self.wait_for_connectivity)
            .field("has_dns_resolver", &self.dns_resolver.is_some())
            .field("tcp_keepalive", &self.tcp_keepalive)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("maximum_uses_per_connection", &self.maximum_uses_per_connection)
            .field("decompression", &self.decompression)
            .finish_non_exhaustive()
    }
}
