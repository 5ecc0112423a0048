//! Outbound connection bootstrap.
//!
//! Platform-agnostic builder for outbound TCP and Unix-socket connections.
//! The bootstrap owns the resolver and iterates resolved addresses itself,
//! racing staggered attempts (RFC 8305 style) and honoring the pipeline
//! deadline: an already-expired deadline fails before any I/O.

use crate::base::deadline::ConnectionDeadline;
use crate::base::error::DialError;
use crate::base::select::first_success;
use crate::config::SocketConfigurator;
use crate::dns::{Name, Resolve};
use crate::socket::stream::Channel;
use crate::socket::target::Target;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout_at;

/// Delay between staggered connect attempts when racing multiple addresses.
const ATTEMPT_STAGGER_DELAY: Duration = Duration::from_millis(250);

pub type Connecting = Pin<Box<dyn Future<Output = Result<Channel, DialError>> + Send>>;

/// Dialer for outbound connections.
///
/// A build-time seam: alternative platform transports implement this trait
/// and are selected once at client construction, invisible to callers except
/// through the error vocabulary.
pub trait Bootstrap: Send + Sync {
    fn connect(&self, target: &Target, deadline: ConnectionDeadline) -> Connecting;
}

/// The POSIX bootstrap: tokio TCP/Unix sockets with socket-level options
/// applied through socket2.
#[derive(Clone)]
pub struct TcpBootstrap {
    resolver: Arc<dyn Resolve>,
    enable_multipath: bool,
    keepalive: Option<Duration>,
    nodelay: bool,
    configurator: Option<SocketConfigurator>,
}

impl TcpBootstrap {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            enable_multipath: false,
            keepalive: None,
            nodelay: true,
            configurator: None,
        }
    }

    pub fn multipath(mut self, enabled: bool) -> Self {
        self.enable_multipath = enabled;
        self
    }

    pub fn keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive = interval;
        self
    }

    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    pub fn configurator(mut self, configurator: Option<SocketConfigurator>) -> Self {
        self.configurator = configurator;
        self
    }

    /// Dial a single resolved address.
    pub async fn connect_to_address(
        &self,
        addr: SocketAddr,
        deadline: ConnectionDeadline,
    ) -> Result<Channel, DialError> {
        deadline.remaining()?;
        let stream = timeout_at(deadline.instant(), self.dial(addr))
            .await
            .map_err(|_| DialError::ConnectTimeout)??;
        Ok(Channel::Tcp(stream))
    }

    /// Resolve a host and race the resulting addresses, IPv6 first with
    /// interleaved families, each attempt staggered by 250ms.
    pub async fn connect_to_host_port(
        &self,
        host: &str,
        port: u16,
        deadline: ConnectionDeadline,
    ) -> Result<Channel, DialError> {
        deadline.remaining()?;

        let resolved = timeout_at(
            deadline.instant(),
            self.resolver.resolve(Name::new(host), port),
        )
        .await
        .map_err(|_| DialError::ConnectTimeout)??;
        let addrs = interleave_families(resolved.collect());
        if addrs.is_empty() {
            return Err(DialError::dns_failed(
                host,
                io::Error::new(io::ErrorKind::NotFound, "resolver returned no addresses"),
            ));
        }
        tracing::debug!(host, port, candidates = addrs.len(), "dialing resolved addresses");

        let attempts: Vec<_> = addrs
            .into_iter()
            .enumerate()
            .map(|(i, addr)| {
                let bootstrap = self.clone();
                async move {
                    if i > 0 {
                        tokio::time::sleep(ATTEMPT_STAGGER_DELAY * i as u32).await;
                    }
                    bootstrap.dial(addr).await
                }
            })
            .collect();

        let race = first_success(attempts, |_| true, || {
            DialError::InvalidTarget("no addresses to dial".into())
        });
        let stream = timeout_at(deadline.instant(), race)
            .await
            .map_err(|_| DialError::ConnectTimeout)??;
        Ok(Channel::Tcp(stream))
    }

    /// Dial a filesystem socket path.
    #[cfg(unix)]
    pub async fn connect_to_path(
        &self,
        path: &std::path::Path,
        deadline: ConnectionDeadline,
    ) -> Result<Channel, DialError> {
        deadline.remaining()?;
        let stream = timeout_at(deadline.instant(), tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| DialError::ConnectTimeout)?
            .map_err(DialError::from)?;
        Ok(Channel::Unix(stream))
    }

    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, DialError> {
        let socket = self.socket_for(addr)?;
        let stream = socket.connect(addr).await.map_err(DialError::from)?;
        if self.nodelay {
            // Nagle off is advisory; a failure here never kills the dial.
            if let Err(e) = stream.set_nodelay(true) {
                tracing::trace!(error = %e, "failed to set TCP_NODELAY");
            }
        }
        tracing::debug!(peer = %addr, "transport connected");
        Ok(stream)
    }

    fn socket_for(&self, addr: SocketAddr) -> Result<TcpSocket, DialError> {
        let domain = Domain::for_address(addr);
        let socket = if self.enable_multipath {
            match Socket::new(domain, Type::STREAM, Some(Protocol::MPTCP)) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!(error = %e, "MPTCP unavailable, falling back to TCP");
                    Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
                        .map_err(DialError::from)?
                }
            }
        } else {
            Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(DialError::from)?
        };

        if let Some(interval) = self.keepalive {
            let keepalive = TcpKeepalive::new().with_time(interval);
            socket
                .set_tcp_keepalive(&keepalive)
                .map_err(DialError::from)?;
        }
        if let Some(configure) = &self.configurator {
            configure(&socket).map_err(DialError::from)?;
        }
        socket.set_nonblocking(true).map_err(DialError::from)?;
        Ok(TcpSocket::from_std_stream(socket.into()))
    }
}

impl Bootstrap for TcpBootstrap {
    fn connect(&self, target: &Target, deadline: ConnectionDeadline) -> Connecting {
        let bootstrap = self.clone();
        let target = target.clone();
        Box::pin(async move {
            match &target {
                Target::IpAddress(ip, port) => {
                    bootstrap
                        .connect_to_address(SocketAddr::new(*ip, *port), deadline)
                        .await
                }
                Target::Domain(host, port) => {
                    bootstrap.connect_to_host_port(host, *port, deadline).await
                }
                #[cfg(unix)]
                Target::UnixSocket(path) => bootstrap.connect_to_path(path, deadline).await,
                #[cfg(not(unix))]
                Target::UnixSocket(_) => Err(DialError::InvalidTarget(
                    "Unix socket targets are not supported on this platform".into(),
                )),
            }
        })
    }
}

/// Order addresses IPv6 first, alternating families, so a broken family
/// costs at most one stagger delay.
fn interleave_families(addrs: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let (v6, v4): (Vec<_>, Vec<_>) = addrs
        .into_iter()
        .partition(|a| matches!(a.ip(), IpAddr::V6(_)));
    let mut ordered = Vec::with_capacity(v6.len() + v4.len());
    let (mut v6, mut v4) = (v6.into_iter(), v4.into_iter());
    loop {
        match (v6.next(), v4.next()) {
            (None, None) => break,
            (a, b) => {
                ordered.extend(a);
                ordered.extend(b);
            }
        }
    }
    ordered
}
