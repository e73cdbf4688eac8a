//! Bounded shutdown under in-flight and idle traffic.

use std::time::{Duration, Instant};

use fixture_server::net::ConnectionKind;
use fixture_server::{stop, EchoHandler, TransportServer};

mod common;

#[tokio::test]
async fn test_stop_is_bounded_with_request_in_flight() {
    let handle = common::start(common::local().handler(EchoHandler::new())).await;
    let url = format!("{}/hang?delay=30000", handle.url());

    let in_flight = tokio::spawn(async move { common::client().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.active_connections(), 1);

    let started = Instant::now();
    stop(handle, Duration::from_millis(300)).await;
    assert!(started.elapsed() < Duration::from_millis(300) + Duration::from_millis(500));

    // The abandoned request fails instead of hanging.
    let outcome = tokio::time::timeout(Duration::from_secs(2), in_flight)
        .await
        .expect("in-flight request was not torn down")
        .unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_port_is_released_after_stop() {
    let handle = common::start(common::local().handler(EchoHandler::new())).await;
    let port = handle.port();

    // Leave an idle keep-alive connection behind.
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    client.get(format!("{}/", handle.url())).send().await.unwrap();

    stop(handle, Duration::from_secs(1)).await;

    let again = TransportServer::start(common::local().port(port)).await.unwrap();
    assert_eq!(again.port(), port);
    again.stop().await;
}

#[tokio::test]
async fn test_no_requests_accepted_after_stop() {
    let handle = common::start(common::local()).await;
    let url = handle.url();
    handle.stop().await;

    let err = common::client().get(url).send().await.unwrap_err();
    assert!(err.is_connect());
}

#[tokio::test]
async fn test_sessions_destroyed_on_stop() {
    let cert = common::test_cert();
    let handle = common::start(
        common::local()
            .handler(EchoHandler::new())
            .secure(Some(cert.material.clone())),
    )
    .await;

    let mut sender = common::h2_session(&handle, cert.roots).await;
    common::h2_request(&mut sender, &handle, "GET", "/", "").await.unwrap();
    assert_eq!(handle.registry().count(ConnectionKind::Session), 1);

    let started = Instant::now();
    stop(handle, Duration::from_secs(5)).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sender.ready().await.is_err() || sender.is_closed());
}
