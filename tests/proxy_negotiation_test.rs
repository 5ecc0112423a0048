//! Proxy negotiation tests against in-process mock proxies: CONNECT status
//! handling, opaque tunnel bytes, SOCKS5 wire exchanges, and handshake
//! deadlines through the factory pipeline.

use netdial::base::deadline::ConnectionDeadline;
use netdial::base::error::DialError;
use netdial::config::ClientConfig;
use netdial::socket::factory::ConnectionFactory;
use netdial::socket::httpconnect;
use netdial::socket::proxy::{ProxyAuthorization, ProxyConfig};
use netdial::socket::socks;
use netdial::socket::stream::Channel;
use netdial::socket::target::{PoolKey, Target};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use url::Url;

async fn tcp_channel(listener: &TcpListener) -> Channel {
    let addr = listener.local_addr().unwrap();
    Channel::Tcp(TcpStream::connect(addr).await.unwrap())
}

fn deadline() -> ConnectionDeadline {
    ConnectionDeadline::from_now(Duration::from_secs(5))
}

#[tokio::test]
async fn connect_tunnel_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let auth = ProxyAuthorization::basic("user", "pass");

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        stream
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nPEEK")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        head
    });

    let mut channel = Channel::Tcp(TcpStream::connect(addr).await.unwrap());
    httpconnect::tunnel(&mut channel, "origin.test:443", Some(&auth), deadline())
        .await
        .unwrap();

    // Bytes past the header terminator belong to the tunnel.
    let mut peek = [0u8; 4];
    channel.read_exact(&mut peek).await.unwrap();
    assert_eq!(&peek, b"PEEK");

    // Wire-exact request shape.
    let head = server.await.unwrap();
    let head = String::from_utf8(head).unwrap();
    assert_eq!(
        head,
        "CONNECT origin.test:443 HTTP/1.1\r\n\
         Host: origin.test:443\r\n\
         Proxy-Authorization: Basic dXNlcjpwYXNz\r\n\
         \r\n"
    );
}

async fn connect_with_status(status_line: &'static str) -> Result<(), DialError> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if stream.read_exact(&mut byte).await.is_err() {
                return;
            }
            head.push(byte[0]);
        }
        let _ = stream
            .write_all(format!("{status_line}\r\n\r\n").as_bytes())
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut channel = Channel::Tcp(TcpStream::connect(addr).await.unwrap());
    httpconnect::tunnel(&mut channel, "origin.test:443", None, deadline()).await
}

#[tokio::test]
async fn connect_407_maps_to_proxy_authentication_required() {
    let result = connect_with_status("HTTP/1.1 407 Proxy Authentication Required").await;
    assert!(matches!(result, Err(DialError::ProxyAuthenticationRequired)));
}

#[tokio::test]
async fn connect_5xx_maps_to_invalid_proxy_response() {
    let result = connect_with_status("HTTP/1.1 502 Bad Gateway").await;
    match result {
        Err(DialError::InvalidProxyResponse(detail)) => assert!(detail.contains("502")),
        other => panic!("expected InvalidProxyResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn dead_http_proxy_times_out_at_the_deadline() {
    // Accepts TCP but never answers the CONNECT.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut config = ClientConfig::new();
    config.proxy = Some(ProxyConfig::http(addr.ip().to_string(), addr.port()));
    let factory = ConnectionFactory::new(config);
    let key = PoolKey::from_url(&Url::parse("http://origin.test/").unwrap(), None).unwrap();

    let started = Instant::now();
    let result = factory
        .make_channel(None, 1, &key, ConnectionDeadline::from_now(Duration::from_secs(1)))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(DialError::HttpProxyHandshakeTimeout)));
    assert!(
        elapsed >= Duration::from_millis(800) && elapsed <= Duration::from_millis(1500),
        "timeout fired at {elapsed:?}"
    );
}

#[tokio::test]
async fn dead_socks_proxy_times_out_at_the_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut config = ClientConfig::new();
    config.proxy = Some(ProxyConfig::socks5(addr.ip().to_string(), addr.port()));
    let factory = ConnectionFactory::new(config);
    let key = PoolKey::from_url(&Url::parse("http://origin.test/").unwrap(), None).unwrap();

    let started = Instant::now();
    let result = factory
        .make_channel(None, 2, &key, ConnectionDeadline::from_now(Duration::from_secs(1)))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(DialError::SocksHandshakeTimeout)));
    assert!(
        elapsed >= Duration::from_millis(800) && elapsed <= Duration::from_millis(1500),
        "timeout fired at {elapsed:?}"
    );
}

/// Minimal SOCKS5 server for one connection.
///
/// `expect_auth` drives the method selection; the recorded CONNECT request
/// bytes (after greeting/auth) are returned for inspection.
async fn socks_server(
    listener: TcpListener,
    expect_auth: Option<(&'static str, &'static str)>,
    reply_code: u8,
) -> Vec<u8> {
    let (mut stream, _) = listener.accept().await.unwrap();

    let mut greeting_head = [0u8; 2];
    stream.read_exact(&mut greeting_head).await.unwrap();
    assert_eq!(greeting_head[0], 0x05);
    let mut methods = vec![0u8; greeting_head[1] as usize];
    stream.read_exact(&mut methods).await.unwrap();

    match expect_auth {
        Some((user, pass)) => {
            assert!(methods.contains(&0x02), "client must offer user/pass auth");
            stream.write_all(&[0x05, 0x02]).await.unwrap();

            let mut auth_head = [0u8; 2];
            stream.read_exact(&mut auth_head).await.unwrap();
            assert_eq!(auth_head[0], 0x01);
            let mut username = vec![0u8; auth_head[1] as usize];
            stream.read_exact(&mut username).await.unwrap();
            assert_eq!(username, user.as_bytes());

            let mut pass_len = [0u8; 1];
            stream.read_exact(&mut pass_len).await.unwrap();
            let mut password = vec![0u8; pass_len[0] as usize];
            stream.read_exact(&mut password).await.unwrap();
            assert_eq!(password, pass.as_bytes());

            stream.write_all(&[0x01, 0x00]).await.unwrap();
        }
        None => {
            stream.write_all(&[0x05, 0x00]).await.unwrap();
        }
    }

    let mut request_head = [0u8; 4];
    stream.read_exact(&mut request_head).await.unwrap();
    let mut request = request_head.to_vec();
    let remaining = match request_head[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.unwrap();
            request.push(len[0]);
            len[0] as usize + 2
        }
        other => panic!("unexpected address type {other}"),
    };
    let mut rest = vec![0u8; remaining];
    stream.read_exact(&mut rest).await.unwrap();
    request.extend_from_slice(&rest);

    // Reply with an IPv4 bound address.
    stream
        .write_all(&[0x05, reply_code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    request
}

#[tokio::test]
async fn socks_passes_domains_by_name() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = tcp_channel(&listener).await;
    let server = tokio::spawn(socks_server(listener, None, 0x00));

    let target = Target::new("origin.test", 8443);
    socks::tunnel(&mut channel, &target, None, deadline())
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert_eq!(&request[..4], &[0x05, 0x01, 0x00, 0x03]);
    assert_eq!(request[4] as usize, "origin.test".len());
    assert_eq!(&request[5..5 + 11], b"origin.test");
    assert_eq!(&request[16..], &8443u16.to_be_bytes());
}

#[tokio::test]
async fn socks_encodes_ipv4_targets_as_octets() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = tcp_channel(&listener).await;
    let server = tokio::spawn(socks_server(listener, None, 0x00));

    let target = Target::new("192.0.2.7", 80);
    socks::tunnel(&mut channel, &target, None, deadline())
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert_eq!(&request[..4], &[0x05, 0x01, 0x00, 0x01]);
    assert_eq!(&request[4..8], &[192, 0, 2, 7]);
    assert_eq!(&request[8..], &80u16.to_be_bytes());
}

#[tokio::test]
async fn socks_username_password_subnegotiation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = tcp_channel(&listener).await;
    let server = tokio::spawn(socks_server(listener, Some(("user", "pass")), 0x00));

    let auth = ProxyAuthorization::basic("user", "pass");
    socks::tunnel(&mut channel, &Target::new("origin.test", 80), Some(&auth), deadline())
        .await
        .unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn socks_auth_rejection_maps_to_authentication_required() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = tcp_channel(&listener).await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut greeting = [0u8; 4];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x02]).await.unwrap();
        // Drain the credentials, then refuse them.
        let mut auth_head = [0u8; 2];
        stream.read_exact(&mut auth_head).await.unwrap();
        let mut drain = vec![0u8; auth_head[1] as usize + 1];
        stream.read_exact(&mut drain).await.unwrap();
        let mut password = vec![0u8; drain[drain.len() - 1] as usize];
        stream.read_exact(&mut password).await.unwrap();
        stream.write_all(&[0x01, 0x01]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let auth = ProxyAuthorization::basic("user", "wrong");
    let result =
        socks::tunnel(&mut channel, &Target::new("origin.test", 80), Some(&auth), deadline()).await;
    assert!(matches!(result, Err(DialError::ProxyAuthenticationRequired)));
}

#[tokio::test]
async fn socks_no_acceptable_method_maps_to_authentication_required() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = tcp_channel(&listener).await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut greeting = [0u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0xFF]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let result = socks::tunnel(&mut channel, &Target::new("origin.test", 80), None, deadline()).await;
    assert!(matches!(result, Err(DialError::ProxyAuthenticationRequired)));
}

#[tokio::test]
async fn socks_connect_rejection_maps_to_invalid_proxy_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = tcp_channel(&listener).await;
    tokio::spawn(socks_server(listener, None, 0x05));

    let result = socks::tunnel(&mut channel, &Target::new("origin.test", 80), None, deadline()).await;
    match result {
        Err(DialError::InvalidProxyResponse(detail)) => {
            assert!(detail.contains("connection refused"), "detail: {detail}")
        }
        other => panic!("expected InvalidProxyResponse, got {other:?}"),
    }
}
