//! TLS negotiation and the shared context cache.
//!
//! Wraps an established channel (direct, tunnelled, or Unix) in TLS,
//! advertising ALPN per the client's HTTP version policy and exposing the
//! protocol the server selected. Compiled BoringSSL contexts are memoised
//! process-wide, keyed structurally on the TLS options.

use crate::base::deadline::ConnectionDeadline;
use crate::base::error::DialError;
use crate::config::HttpVersionPolicy;
use crate::socket::stream::{BoxedIo, Channel, NegotiatedProtocol};
use boring::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode, SslVersion};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tokio::time::timeout_at;

/// Protocol version bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    Tls1,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

impl TlsVersion {
    fn to_boring(self) -> SslVersion {
        match self {
            Self::Tls1 => SslVersion::TLS1,
            Self::Tls1_1 => SslVersion::TLS1_1,
            Self::Tls1_2 => SslVersion::TLS1_2,
            Self::Tls1_3 => SslVersion::TLS1_3,
        }
    }
}

/// TLS parameters for outbound connections.
///
/// Structural equality and hashing define context-cache identity, so two
/// configurations with the same contents share one compiled context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsOptions {
    /// Verify the peer certificate chain. Disabled only for tests and
    /// explicitly-trusted internal endpoints.
    pub verify_peer: bool,
    /// Additional trust roots (PEM bundle).
    pub ca_file: Option<PathBuf>,
    /// Client identity for mutual TLS.
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub min_version: Option<TlsVersion>,
    pub max_version: Option<TlsVersion>,
    /// ALPN protocols in preference order. For HTTP use the connection
    /// factory overrides this per the client's version policy.
    pub alpn: Vec<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            ca_file: None,
            client_cert_file: None,
            client_key_file: None,
            min_version: Some(TlsVersion::Tls1_2),
            max_version: None,
            alpn: Vec::new(),
        }
    }
}

impl TlsOptions {
    /// Structural hash, used as the pool-key TLS fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Copy of these options with the ALPN list the policy dictates.
    pub(crate) fn with_alpn_for(&self, policy: HttpVersionPolicy) -> TlsOptions {
        let alpn = match policy {
            HttpVersionPolicy::Auto => vec!["h2".to_string(), "http/1.1".to_string()],
            HttpVersionPolicy::Http1Only => vec!["http/1.1".to_string()],
        };
        TlsOptions {
            alpn,
            ..self.clone()
        }
    }

    fn build_context(&self) -> Result<SslConnector, DialError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|e| DialError::tls(e.to_string()))?;

        if let Some(min) = self.min_version {
            builder
                .set_min_proto_version(Some(min.to_boring()))
                .map_err(|e| DialError::tls(e.to_string()))?;
        }
        if let Some(max) = self.max_version {
            builder
                .set_max_proto_version(Some(max.to_boring()))
                .map_err(|e| DialError::tls(e.to_string()))?;
        }

        builder.set_verify(if self.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        if let Some(ca) = &self.ca_file {
            builder
                .set_ca_file(ca)
                .map_err(|e| DialError::tls(e.to_string()))?;
        }
        if let Some(cert) = &self.client_cert_file {
            builder
                .set_certificate_chain_file(cert)
                .map_err(|e| DialError::tls(e.to_string()))?;
        }
        if let Some(key) = &self.client_key_file {
            builder
                .set_private_key_file(key, SslFiletype::PEM)
                .map_err(|e| DialError::tls(e.to_string()))?;
        }

        if !self.alpn.is_empty() {
            let mut wire = Vec::new();
            for proto in &self.alpn {
                if proto.len() > 255 {
                    return Err(DialError::tls("ALPN protocol name exceeds 255 octets"));
                }
                wire.push(proto.len() as u8);
                wire.extend_from_slice(proto.as_bytes());
            }
            builder
                .set_alpn_protos(&wire)
                .map_err(|e| DialError::tls(e.to_string()))?;
        }

        Ok(builder.build())
    }
}

/// Entries above this are evicted wholesale before the next insert.
const CACHE_SOFT_CAP: usize = 32;

/// Process-wide cache of compiled TLS contexts, keyed structurally on the
/// options. At most one context is compiled per key; concurrent requesters
/// for the same key wait on the single in-flight build. Entries are
/// immutable once cached.
pub struct SslContextCache {
    contexts: DashMap<TlsOptions, Arc<SslConnector>>,
}

impl SslContextCache {
    fn new() -> Self {
        Self {
            contexts: DashMap::new(),
        }
    }

    /// The shared process-wide instance.
    pub fn shared() -> &'static SslContextCache {
        static CACHE: LazyLock<SslContextCache> = LazyLock::new(SslContextCache::new);
        &CACHE
    }

    pub fn context_for(&self, options: &TlsOptions) -> Result<Arc<SslConnector>, DialError> {
        if let Some(context) = self.contexts.get(options) {
            return Ok(context.clone());
        }

        if self.contexts.len() >= CACHE_SOFT_CAP {
            tracing::debug!(
                entries = self.contexts.len(),
                "TLS context cache exceeded its soft cap, clearing"
            );
            self.contexts.clear();
        }

        // The entry holds its shard's lock, so a second requester for the
        // same key blocks here until the first build completes.
        match self.contexts.entry(options.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                tracing::debug!(fingerprint = options.fingerprint(), "compiling TLS context");
                let context = Arc::new(options.build_context()?);
                entry.insert(context.clone());
                Ok(context)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Perform the TLS handshake over an established channel.
///
/// `server_name` carries the SNI/verification name: the explicit override
/// when present, else the target domain. IP literals are passed through and
/// BoringSSL omits the SNI extension for them per RFC 6066; an empty name
/// disables SNI and hostname verification entirely (Unix-socket targets).
///
/// Resolves to the wrapped channel and the negotiated ALPN protocol, or
/// `TlsHandshakeTimeout` when the pipeline deadline fires first.
pub async fn negotiate(
    channel: Channel,
    options: &TlsOptions,
    server_name: &str,
    deadline: ConnectionDeadline,
) -> Result<(Channel, Option<String>), DialError> {
    deadline.remaining().map_err(|_| DialError::TlsHandshakeTimeout)?;

    let connector = SslContextCache::shared().context_for(options)?;
    let mut config = connector
        .configure()
        .map_err(|e| DialError::tls(e.to_string()))?;
    if server_name.is_empty() {
        config.set_use_server_name_indication(false);
        config.set_verify_hostname(false);
    }

    let handshake = tokio_boring::connect(config, server_name, BoxedIo::new(channel));
    match timeout_at(deadline.instant(), handshake).await {
        Err(_) => {
            tracing::debug!(server_name, "TLS handshake hit the pipeline deadline");
            Err(DialError::TlsHandshakeTimeout)
        }
        Ok(Err(e)) => Err(DialError::tls(format!("{e:?}"))),
        Ok(Ok(stream)) => {
            let alpn = stream
                .ssl()
                .selected_alpn_protocol()
                .map(|proto| String::from_utf8_lossy(proto).into_owned());
            tracing::debug!(server_name, alpn = ?alpn, "TLS handshake complete");
            Ok((Channel::Tls(stream), alpn))
        }
    }
}

/// Map the negotiated ALPN token to an HTTP version.
///
/// No ALPN and `http/1.1` select HTTP/1.1; `h2` selects HTTP/2; anything
/// else fails the establishment.
pub fn match_alpn_to_http_version(
    channel: Channel,
    alpn: Option<&str>,
) -> Result<NegotiatedProtocol, DialError> {
    match alpn {
        None | Some("http/1.1") => Ok(NegotiatedProtocol::Http1(channel)),
        Some("h2") => Ok(NegotiatedProtocol::Http2(channel)),
        Some(other) => Err(DialError::UnsupportedApplicationProtocol(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_policy_lists() {
        let options = TlsOptions::default();
        assert_eq!(
            options.with_alpn_for(HttpVersionPolicy::Auto).alpn,
            vec!["h2", "http/1.1"]
        );
        assert_eq!(
            options.with_alpn_for(HttpVersionPolicy::Http1Only).alpn,
            vec!["http/1.1"]
        );
    }

    #[test]
    fn fingerprint_is_structural() {
        let a = TlsOptions::default();
        let b = TlsOptions::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = TlsOptions {
            verify_peer: false,
            ..TlsOptions::default()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn equal_options_share_one_cached_context() {
        let cache = SslContextCache::new();
        let options = TlsOptions::default();

        let first = cache.context_for(&options).unwrap();
        let second = cache.context_for(&options.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_options_compile_distinct_contexts() {
        let cache = SslContextCache::new();
        cache.context_for(&TlsOptions::default()).unwrap();
        cache
            .context_for(&TlsOptions {
                verify_peer: false,
                ..TlsOptions::default()
            })
            .unwrap();
        assert_eq!(cache.len(), 2);
    }
}
