//! Connection establishment.
//!
//! The pipeline that turns a pool key into a live channel:
//! - [`target`]: schemes, targets, pool keys
//! - [`bootstrap`]: resolver-driven TCP/Unix dialing
//! - [`httpconnect`] / [`socks`]: proxy tunnel negotiation
//! - [`tls`]: TLS handshake, ALPN, shared context cache
//! - [`factory`]: orchestration of the stages under one deadline

pub mod bootstrap;
pub mod factory;
pub mod httpconnect;
pub mod proxy;
pub mod socks;
pub mod stream;
pub mod target;
pub mod tls;
