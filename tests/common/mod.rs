//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::SendRequest;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use fixture_server::{ServerConfig, ServerHandle, TlsMaterial, TransportServer};

/// Loopback config on an ephemeral port.
pub fn local() -> ServerConfig {
    ServerConfig::default().host("127.0.0.1").port(0)
}

pub async fn start(config: ServerConfig) -> ServerHandle {
    TransportServer::start(config).await.expect("server failed to start")
}

/// Non-pooled client, so every request sees a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Self-signed material plus the certificate clients must trust.
pub struct TestCert {
    pub material: TlsMaterial,
    pub roots: RootCertStore,
}

pub fn test_cert() -> TestCert {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let material = TlsMaterial::new(
        certified.key_pair.serialize_pem(),
        certified.cert.pem(),
    );
    let mut roots = RootCertStore::empty();
    roots.add(certified.cert.der().clone()).unwrap();
    TestCert { material, roots }
}

/// Open one HTTP/2 session over TLS. Every request sent through the
/// returned handle shares that session.
pub async fn h2_session(handle: &ServerHandle, roots: RootCertStore) -> SendRequest<Full<Bytes>> {
    let tls = tls_connect(handle, roots, vec![b"h2".to_vec()]).await;
    assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"h2"[..]));

    let (sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(tls))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    sender
}

/// TLS connection to `handle` offering `alpn` (possibly nothing).
pub async fn tls_connect(
    handle: &ServerHandle,
    roots: RootCertStore,
    alpn: Vec<Vec<u8>>,
) -> TlsStream<TcpStream> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn;

    let tcp = TcpStream::connect(handle.address()).await.unwrap();
    TlsConnector::from(Arc::new(config))
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap()
}

/// Send one request over an h2 session and collect the response.
pub async fn h2_request(
    sender: &mut SendRequest<Full<Bytes>>,
    handle: &ServerHandle,
    method: &str,
    path: &str,
    body: &'static str,
) -> Result<(hyper::StatusCode, Bytes), hyper::Error> {
    sender.ready().await?;
    let request = hyper::Request::builder()
        .method(method)
        .uri(format!("{}{}", handle.url(), path))
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();
    let response = sender.send_request(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok((status, bytes))
}

pub fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}
