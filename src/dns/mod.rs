//! DNS resolution.
//!
//! Pluggable resolver abstraction consumed by the bootstrap:
//! - System resolver (getaddrinfo via thread pool), the default
//! - Async hickory-dns resolver
//! - Hostname-to-IP override wrapper for tests and pinning

mod gai;
mod hickory;
mod resolve;

pub use gai::GaiResolver;
pub use hickory::HickoryResolver;
pub use resolve::{Addrs, Name, Resolve, ResolverWithOverrides, Resolving};
