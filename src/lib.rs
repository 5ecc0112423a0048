//! # netdial
//!
//! Connection establishment core for asynchronous HTTP clients.
//!
//! Given a request origin (scheme + host + port, or a filesystem socket
//! path), `netdial` produces a transport-level bidirectional byte channel
//! ready for an HTTP/1.1 or HTTP/2 session, composing:
//!
//! - **Address resolution**: pluggable async resolvers (system getaddrinfo,
//!   hickory-dns, test overrides)
//! - **Dialing**: TCP (with MPTCP and keepalive options) and Unix sockets,
//!   racing resolved addresses with staggered attempts
//! - **Proxy negotiation**: HTTP `CONNECT` and SOCKSv5 tunnels
//! - **TLS**: BoringSSL handshakes with ALPN-based protocol selection and a
//!   process-wide compiled-context cache
//! - **One deadline**: a single absolute instant bounds the whole pipeline;
//!   every stage derives its own timer from it
//!
//! The per-request [`http::transaction::Transaction`] state machine drives a
//! single exchange over the established channel: request-body backpressure,
//! response head/body delivery, cancellation, and the request deadline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netdial::base::deadline::ConnectionDeadline;
//! use netdial::config::ClientConfig;
//! use netdial::socket::factory::ConnectionFactory;
//! use netdial::socket::target::PoolKey;
//! use std::time::Duration;
//!
//! let factory = ConnectionFactory::new(ClientConfig::new());
//! let key = PoolKey::from_url(&"https://example.com".parse()?, None)?;
//! let deadline = ConnectionDeadline::from_now(Duration::from_secs(10));
//! let negotiated = factory.make_channel(None, 1, &key, deadline).await?;
//! ```
//!
//! Out of scope here and owned by the wider client: request serialization,
//! response parsing, redirects, cookies, decompression codecs, pool eviction
//! policy, and retry policy.

pub mod base;
pub mod config;
pub mod dns;
pub mod http;
pub mod socket;
