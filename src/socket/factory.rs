//! Connection factory: composes resolve, dial, proxy and TLS stages into one
//! deadline-bound pipeline and starts the negotiated protocol.

use crate::base::deadline::ConnectionDeadline;
use crate::base::error::DialError;
use crate::config::ClientConfig;
use crate::dns::GaiResolver;
use crate::socket::bootstrap::{Bootstrap, TcpBootstrap};
use crate::socket::httpconnect;
use crate::socket::proxy::{ProxyConfig, ProxyKind};
use crate::socket::socks;
use crate::socket::stream::{Channel, NegotiatedProtocol};
use crate::socket::target::{PoolKey, Target};
use crate::socket::tls;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::sync::Arc;
use std::time::Duration;

/// Pause between dial retries while parked waiting for connectivity.
const CONNECTIVITY_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Concurrency assumption reported for a fresh HTTP/2 connection until the
/// server's SETTINGS arrive (RFC 9113 recommended minimum).
const DEFAULT_HTTP2_MAX_STREAMS: u32 = 100;

/// A started HTTP/1.1 connection handle.
pub struct Http1Connection {
    pub sender: http1::SendRequest<Full<Bytes>>,
}

/// A started HTTP/2 connection handle.
pub struct Http2Connection {
    pub sender: http2::SendRequest<Full<Bytes>>,
}

/// Callbacks through which connection creation reports back to its owner.
pub trait HttpConnectionRequester: Send + Sync {
    fn http1_created(&self, connection_id: u64, connection: Http1Connection);
    fn http2_created(&self, connection_id: u64, connection: Http2Connection, maximum_streams: u32);
    fn failed_to_create(&self, connection_id: u64, error: DialError);
    /// The dial hit a network-down/unreachable condition and is parked
    /// retrying until the deadline.
    fn waiting_for_connectivity(&self, connection_id: u64);
}

/// Builds protocol-negotiated channels for pool keys.
pub struct ConnectionFactory {
    config: ClientConfig,
    bootstrap: Arc<dyn Bootstrap>,
}

impl ConnectionFactory {
    pub fn new(config: ClientConfig) -> Self {
        let resolver = config
            .dns_resolver
            .clone()
            .unwrap_or_else(|| Arc::new(GaiResolver::new()));
        let bootstrap = TcpBootstrap::new(resolver)
            .multipath(config.enable_multipath)
            .keepalive(config.tcp_keepalive)
            .nodelay(config.tcp_nodelay)
            .configurator(config.socket_configurator.clone());
        Self {
            config,
            bootstrap: Arc::new(bootstrap),
        }
    }

    /// Construct with an alternative transport implementation.
    pub fn with_bootstrap(config: ClientConfig, bootstrap: Arc<dyn Bootstrap>) -> Self {
        Self { config, bootstrap }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Establish a channel for `key`, negotiating proxy and TLS stages as the
    /// scheme and configuration demand, all under one deadline.
    ///
    /// Exactly one `NegotiatedProtocol` is produced on success and the
    /// returned channel is active. A deadline already in the past fails with
    /// `ConnectTimeout` before any socket is opened.
    pub async fn make_channel(
        &self,
        requester: Option<&dyn HttpConnectionRequester>,
        connection_id: u64,
        key: &PoolKey,
        deadline: ConnectionDeadline,
    ) -> Result<NegotiatedProtocol, DialError> {
        deadline.remaining()?;
        if let Some(proxy) = &self.config.proxy {
            proxy.validate_target(&key.target)?;
        }

        tracing::debug!(
            connection_id,
            scheme = %key.scheme,
            target = %key.target,
            "establishing connection"
        );

        let negotiated = match &self.config.proxy {
            Some(proxy) if key.scheme.proxyable() => {
                self.proxy_pipeline(requester, connection_id, key, proxy, deadline)
                    .await?
            }
            _ => {
                self.direct_pipeline(requester, connection_id, key, deadline)
                    .await?
            }
        };

        tracing::debug!(
            connection_id,
            http2 = negotiated.is_http2(),
            "connection established"
        );
        Ok(negotiated)
    }

    async fn direct_pipeline(
        &self,
        requester: Option<&dyn HttpConnectionRequester>,
        connection_id: u64,
        key: &PoolKey,
        deadline: ConnectionDeadline,
    ) -> Result<NegotiatedProtocol, DialError> {
        let channel = self
            .connect_transport(requester, connection_id, &key.target, deadline)
            .await?;
        if key.scheme.uses_tls() {
            self.tls_stage(channel, key, deadline).await
        } else {
            Ok(NegotiatedProtocol::Http1(channel))
        }
    }

    async fn proxy_pipeline(
        &self,
        requester: Option<&dyn HttpConnectionRequester>,
        connection_id: u64,
        key: &PoolKey,
        proxy: &ProxyConfig,
        deadline: ConnectionDeadline,
    ) -> Result<NegotiatedProtocol, DialError> {
        let proxy_target = Target::new(&proxy.host, proxy.port);
        let mut channel = self
            .connect_transport(requester, connection_id, &proxy_target, deadline)
            .await?;

        match proxy.kind {
            ProxyKind::Http => {
                let authority = key.target.authority().ok_or_else(|| {
                    DialError::InvalidTarget("CONNECT target has no authority".into())
                })?;
                httpconnect::tunnel(
                    &mut channel,
                    &authority,
                    proxy.authorization.as_ref(),
                    deadline,
                )
                .await?;
            }
            ProxyKind::Socks5 => {
                socks::tunnel(
                    &mut channel,
                    &key.target,
                    proxy.authorization.as_ref(),
                    deadline,
                )
                .await?;
            }
        }

        if key.scheme.uses_tls() {
            self.tls_stage(channel, key, deadline).await
        } else {
            // Cleartext HTTP/2 upgrade through a proxy is out of scope.
            Ok(NegotiatedProtocol::Http1(channel))
        }
    }

    async fn tls_stage(
        &self,
        channel: Channel,
        key: &PoolKey,
        deadline: ConnectionDeadline,
    ) -> Result<NegotiatedProtocol, DialError> {
        let options = self.config.tls.with_alpn_for(self.config.http_version);
        let server_name = match (&key.sni_override, &key.target) {
            (Some(sni), _) => sni.clone(),
            (None, Target::Domain(host, _)) => host.clone(),
            (None, Target::IpAddress(ip, _)) => ip.to_string(),
            (None, Target::UnixSocket(_)) => String::new(),
        };
        let (channel, alpn) = tls::negotiate(channel, &options, &server_name, deadline).await?;
        tls::match_alpn_to_http_version(channel, alpn.as_deref())
    }

    /// Dial the transport, optionally parking on connectivity loss.
    async fn connect_transport(
        &self,
        requester: Option<&dyn HttpConnectionRequester>,
        connection_id: u64,
        target: &Target,
        deadline: ConnectionDeadline,
    ) -> Result<Channel, DialError> {
        let mut notified = false;
        loop {
            match self.bootstrap.connect(target, deadline).await {
                Ok(channel) => return Ok(channel),
                Err(DialError::Posix {
                    code: Some(code), ..
                }) if self.config.wait_for_connectivity && is_unreachable(code) => {
                    if !notified {
                        tracing::debug!(connection_id, %target, code, "waiting for connectivity");
                        if let Some(requester) = requester {
                            requester.waiting_for_connectivity(connection_id);
                        }
                        notified = true;
                    }
                    let remaining = deadline.remaining()?;
                    tokio::time::sleep(CONNECTIVITY_RETRY_PAUSE.min(remaining)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Establish a channel and start the negotiated protocol over it,
    /// reporting the started connection (or the failure) to `requester`.
    pub async fn make_connection(
        &self,
        requester: &dyn HttpConnectionRequester,
        connection_id: u64,
        key: &PoolKey,
        deadline: ConnectionDeadline,
    ) {
        let negotiated = match self
            .make_channel(Some(requester), connection_id, key, deadline)
            .await
        {
            Ok(negotiated) => negotiated,
            Err(e) => {
                requester.failed_to_create(connection_id, e);
                return;
            }
        };

        match negotiated {
            NegotiatedProtocol::Http1(channel) => {
                if let Some(initializer) = &self.config.http1_debug_initializer {
                    if let Err(e) = initializer(&channel) {
                        requester.failed_to_create(connection_id, e);
                        return;
                    }
                }
                let handshake: Result<(http1::SendRequest<Full<Bytes>>, _), _> =
                    http1::handshake(TokioIo::new(channel)).await;
                match handshake {
                    Ok((sender, connection)) => {
                        tokio::spawn(async move {
                            if let Err(e) = connection.await {
                                tracing::debug!(connection_id, error = %e, "HTTP/1.1 connection error");
                            }
                        });
                        requester.http1_created(connection_id, Http1Connection { sender });
                    }
                    Err(e) => {
                        tracing::debug!(connection_id, error = %e, "HTTP/1.1 protocol start failed");
                        requester
                            .failed_to_create(connection_id, DialError::RemoteConnectionClosed);
                    }
                }
            }
            NegotiatedProtocol::Http2(channel) => {
                if let Some(initializer) = &self.config.http2_debug_initializer {
                    if let Err(e) = initializer(&channel) {
                        requester.failed_to_create(connection_id, e);
                        return;
                    }
                }
                let handshake: Result<(http2::SendRequest<Full<Bytes>>, _), _> =
                    http2::handshake(TokioExecutor::new(), TokioIo::new(channel)).await;
                match handshake {
                    Ok((sender, connection)) => {
                        tokio::spawn(async move {
                            if let Err(e) = connection.await {
                                tracing::debug!(connection_id, error = %e, "HTTP/2 connection error");
                            }
                        });
                        requester.http2_created(
                            connection_id,
                            Http2Connection { sender },
                            DEFAULT_HTTP2_MAX_STREAMS,
                        );
                    }
                    Err(e) => {
                        tracing::debug!(connection_id, error = %e, "HTTP/2 protocol start failed");
                        requester
                            .failed_to_create(connection_id, DialError::RemoteConnectionClosed);
                    }
                }
            }
        }
    }
}

fn is_unreachable(code: i32) -> bool {
    // ENETDOWN / ENETUNREACH
    code == 100 || code == 101
}
