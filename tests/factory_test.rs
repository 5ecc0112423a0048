//! Connection factory end-to-end tests against in-process listeners.

use netdial::base::deadline::ConnectionDeadline;
use netdial::base::error::DialError;
use netdial::config::ClientConfig;
use netdial::dns::{Addrs, Name, Resolve, Resolving};
use netdial::socket::factory::{
    ConnectionFactory, Http1Connection, Http2Connection, HttpConnectionRequester,
};
use netdial::socket::stream::NegotiatedProtocol;
use netdial::socket::target::PoolKey;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use url::Url;

/// Resolver that pins every name to loopback and counts invocations.
struct LoopbackResolver {
    invocations: AtomicUsize,
}

impl LoopbackResolver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
        })
    }
}

impl Resolve for LoopbackResolver {
    fn resolve(&self, _name: Name, port: u16) -> Resolving {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let addrs = vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)];
        Box::pin(std::future::ready(Ok(Box::new(addrs.into_iter()) as Addrs)))
    }
}

fn key_for(url: &str) -> PoolKey {
    PoolKey::from_url(&Url::parse(url).unwrap(), None).unwrap()
}

fn deadline() -> ConnectionDeadline {
    ConnectionDeadline::from_now(Duration::from_secs(5))
}

#[tokio::test]
async fn direct_plaintext_ip_target_yields_http1() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let factory = ConnectionFactory::new(ClientConfig::new());
    let negotiated = factory
        .make_channel(None, 1, &key_for(&format!("http://127.0.0.1:{port}/")), deadline())
        .await
        .unwrap();

    match &negotiated {
        NegotiatedProtocol::Http1(channel) => assert!(channel.is_active()),
        NegotiatedProtocol::Http2(_) => panic!("plaintext must negotiate HTTP/1.1"),
    }
}

#[tokio::test]
async fn domain_target_invokes_the_configured_resolver() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let resolver = LoopbackResolver::new();
    let mut config = ClientConfig::new();
    config.dns_resolver = Some(resolver.clone());

    let factory = ConnectionFactory::new(config);
    let negotiated = factory
        .make_channel(None, 2, &key_for(&format!("http://origin.test:{port}/")), deadline())
        .await
        .unwrap();

    assert!(matches!(negotiated, NegotiatedProtocol::Http1(_)));
    assert!(resolver.invocations.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn past_deadline_fails_without_opening_a_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let factory = ConnectionFactory::new(ClientConfig::new());
    let past = ConnectionDeadline::at(Instant::now() - Duration::from_secs(1));
    let result = factory
        .make_channel(None, 3, &key_for(&format!("http://127.0.0.1:{port}/")), past)
        .await;

    assert!(matches!(result, Err(DialError::ConnectTimeout)));

    // Nothing ever dialed the listener.
    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "a socket was opened despite the past deadline");
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_target_yields_http1() {
    use netdial::socket::target::{Scheme, Target};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let _ = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let factory = ConnectionFactory::new(ClientConfig::new());
    let key = PoolKey {
        scheme: Scheme::HttpUnix,
        target: Target::UnixSocket(path),
        sni_override: None,
        tls_fingerprint: None,
    };
    let negotiated = factory.make_channel(None, 4, &key, deadline()).await.unwrap();

    match &negotiated {
        NegotiatedProtocol::Http1(channel) => assert!(channel.is_active()),
        NegotiatedProtocol::Http2(_) => panic!("unix sockets negotiate HTTP/1.1"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn socks_proxy_with_unix_target_is_rejected_before_io() {
    use netdial::socket::proxy::ProxyConfig;
    use netdial::socket::target::{Scheme, Target};

    let mut config = ClientConfig::new();
    config.proxy = Some(ProxyConfig::socks5("proxy.test", 1080));

    let factory = ConnectionFactory::new(config);
    let key = PoolKey {
        scheme: Scheme::HttpUnix,
        target: Target::UnixSocket("/tmp/app.sock".into()),
        sni_override: None,
        tls_fingerprint: None,
    };
    let result = factory.make_channel(None, 5, &key, deadline()).await;
    assert!(matches!(result, Err(DialError::InvalidProxyConfig(_))));
}

#[derive(Default)]
struct RecordingRequester {
    events: Mutex<Vec<String>>,
}

impl RecordingRequester {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl HttpConnectionRequester for RecordingRequester {
    fn http1_created(&self, connection_id: u64, _connection: Http1Connection) {
        self.events.lock().unwrap().push(format!("http1:{connection_id}"));
    }

    fn http2_created(
        &self,
        connection_id: u64,
        _connection: Http2Connection,
        maximum_streams: u32,
    ) {
        self.events
            .lock()
            .unwrap()
            .push(format!("http2:{connection_id}:{maximum_streams}"));
    }

    fn failed_to_create(&self, connection_id: u64, error: DialError) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{connection_id}:{error}"));
    }

    fn waiting_for_connectivity(&self, connection_id: u64) {
        self.events
            .lock()
            .unwrap()
            .push(format!("waiting:{connection_id}"));
    }
}

#[tokio::test]
async fn make_connection_reports_http1_created() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let factory = ConnectionFactory::new(ClientConfig::new());
    let requester = RecordingRequester::default();
    factory
        .make_connection(&requester, 7, &key_for(&format!("http://127.0.0.1:{port}/")), deadline())
        .await;

    assert_eq!(requester.events(), vec!["http1:7".to_string()]);
}

#[tokio::test]
async fn make_connection_reports_failure_on_refused_connect() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let factory = ConnectionFactory::new(ClientConfig::new());
    let requester = RecordingRequester::default();
    factory
        .make_connection(&requester, 8, &key_for(&format!("http://127.0.0.1:{port}/")), deadline())
        .await;

    let events = requester.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("failed:8:"), "unexpected event {events:?}");
}

#[tokio::test]
async fn debug_initializer_failure_fails_creation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut config = ClientConfig::new();
    config.http1_debug_initializer = Some(Arc::new(|_channel| {
        Err(DialError::InvalidTarget("initializer rejected".into()))
    }));

    let factory = ConnectionFactory::new(config);
    let requester = RecordingRequester::default();
    factory
        .make_connection(&requester, 9, &key_for(&format!("http://127.0.0.1:{port}/")), deadline())
        .await;

    let events = requester.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("failed:9:"), "unexpected event {events:?}");
}
