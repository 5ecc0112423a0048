//! System DNS resolver using getaddrinfo.
//!
//! Respects system configuration (/etc/resolv.conf, nsswitch) by delegating
//! to the platform resolver, executed in a blocking task so the async runtime
//! is never stalled.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::error::DialError;
use std::{io, net::ToSocketAddrs};

/// System DNS resolver running `getaddrinfo` in a thread pool.
///
/// This is the default resolver when no custom resolver is configured. Each
/// resolution spawns a blocking task; for high-throughput scenarios prefer
/// [`HickoryResolver`](super::HickoryResolver), which is fully async.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name, port: u16) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, port, "resolving via getaddrinfo");
                (host.as_str(), port)
                    .to_socket_addrs()
                    .map(|iter| iter.collect::<Vec<_>>())
            })
            .await;

            let addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    DialError::dns_failed(
                        domain.clone(),
                        io::Error::new(io::ErrorKind::Other, e.to_string()),
                    )
                })?
                .map_err(|e| {
                    tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
                    DialError::dns_failed(domain.clone(), e)
                })?;

            if addrs.is_empty() {
                return Err(DialError::dns_failed(
                    domain,
                    io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
                ));
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
