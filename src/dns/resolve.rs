//! Core DNS resolution types and traits.

use crate::base::error::DialError;
use std::{
    collections::HashMap, fmt, future::Future, net::IpAddr, net::SocketAddr, pin::Pin, sync::Arc,
};

/// A domain name to resolve into socket addresses.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Alias for an `Iterator` trait object over `SocketAddr`.
pub type Addrs = Box<dyn Iterator<Item = SocketAddr> + Send>;

/// Alias for the `Future` type returned by a DNS resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, DialError>> + Send>>;

/// Trait for DNS resolution.
///
/// The bootstrap installs one resolver and iterates the returned addresses
/// natively during dialing. A successful resolution yields at least one
/// address, each already carrying the requested port.
///
/// Implementations must be thread-safe; resolution takes `&self` so a single
/// resolver instance can serve concurrent dials.
pub trait Resolve: Send + Sync {
    fn resolve(&self, name: Name, port: u16) -> Resolving;
}

/// Blanket implementation for Arc-wrapped resolvers.
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, name: Name, port: u16) -> Resolving {
        (**self).resolve(name, port)
    }
}

/// Resolver wrapper that consults a hostname-to-address override map before
/// falling back to the inner resolver. Used by tests and for pinning local
/// development hostnames.
pub struct ResolverWithOverrides {
    inner: Arc<dyn Resolve>,
    overrides: Arc<HashMap<String, Vec<IpAddr>>>,
}

impl ResolverWithOverrides {
    pub fn new(inner: Arc<dyn Resolve>, overrides: HashMap<String, Vec<IpAddr>>) -> Self {
        Self {
            inner,
            overrides: Arc::new(overrides),
        }
    }
}

impl Resolve for ResolverWithOverrides {
    fn resolve(&self, name: Name, port: u16) -> Resolving {
        if let Some(ips) = self.overrides.get(name.as_str()) {
            let addrs: Vec<SocketAddr> = ips.iter().map(|ip| SocketAddr::new(*ip, port)).collect();
            return Box::pin(std::future::ready(Ok(Box::new(addrs.into_iter()) as Addrs)));
        }
        self.inner.resolve(name, port)
    }
}

impl fmt::Debug for ResolverWithOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverWithOverrides")
            .field("override_count", &self.overrides.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct MockResolver {
        response: Vec<IpAddr>,
    }

    impl Resolve for MockResolver {
        fn resolve(&self, _name: Name, port: u16) -> Resolving {
            let addrs: Vec<SocketAddr> = self
                .response
                .iter()
                .map(|ip| SocketAddr::new(*ip, port))
                .collect();
            Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) })
        }
    }

    #[test]
    fn name_round_trips() {
        let name = Name::from("example.com");
        assert_eq!(name.as_str(), "example.com");
        assert_eq!(name.to_string(), "example.com");
    }

    #[tokio::test]
    async fn override_hit_carries_the_requested_port() {
        let mock = Arc::new(MockResolver {
            response: vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))],
        });

        let mut overrides = HashMap::new();
        overrides.insert(
            "override.local".to_string(),
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        );

        let resolver = ResolverWithOverrides::new(mock, overrides);
        let addrs: Vec<_> = resolver
            .resolve(Name::new("override.local"), 8443)
            .await
            .unwrap()
            .collect();

        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addrs[0].port(), 8443);
    }

    #[tokio::test]
    async fn override_miss_falls_back_to_inner() {
        let mock = Arc::new(MockResolver {
            response: vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))],
        });

        let resolver = ResolverWithOverrides::new(mock, HashMap::new());
        let addrs: Vec<_> = resolver
            .resolve(Name::new("not-overridden.com"), 80)
            .await
            .unwrap()
            .collect();

        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].ip(), IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
