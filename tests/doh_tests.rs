//! RFC 8484 surface over a live HTTP listener.

mod common;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mimir::dns::Packet;
use mimir::dns::enums::RecordType;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;

struct DohHarness {
    base: String,
    shutdown: broadcast::Sender<()>,
}

async fn start_doh(server: &common::TestServer) -> DohHarness {
    // Grab a free port, then hand it to the DoH listener.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = probe.local_addr().unwrap();
    drop(probe);

    let (shutdown, _) = broadcast::channel(1);
    let engine = server.engine.clone();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = mimir::doh::serve(engine, addr, rx).await;
    });

    // Give the listener a moment to bind.
    tokio::time::sleep(Duration::from_millis(100)).await;

    DohHarness {
        base: format!("http://{}/dns-query", addr),
        shutdown,
    }
}

#[tokio::test]
async fn get_with_base64url_packet() {
    let server = common::engine();
    server.seed_example_zone();
    let harness = start_doh(&server).await;

    let wire = common::query("www.example.com", RecordType::A, 0x1234);
    let encoded = URL_SAFE_NO_PAD.encode(&wire);

    let response = reqwest::get(format!("{}?dns={}", harness.base, encoded))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/dns-message"
    );

    let body = response.bytes().await.unwrap();
    let packet = Packet::parse(&body).unwrap();
    assert_eq!(packet.header.id, 0x1234);
    assert_eq!(packet.answers.len(), 1);

    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn post_with_raw_packet() {
    let server = common::engine();
    server.seed_example_zone();
    let harness = start_doh(&server).await;

    let wire = common::query("www.example.com", RecordType::A, 0x4321);
    let client = reqwest::Client::new();
    let response = client
        .post(&harness.base)
        .header("content-type", "application/dns-message")
        .body(wire)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.bytes().await.unwrap();
    let packet = Packet::parse(&body).unwrap();
    assert_eq!(packet.header.id, 0x4321);
    assert!(packet.header.aa);

    let _ = harness.shutdown.send(());
}

#[tokio::test]
async fn error_mapping() {
    let server = common::engine();
    server.seed_example_zone();
    let harness = start_doh(&server).await;
    let client = reqwest::Client::new();

    // Missing parameter.
    let response = client.get(&harness.base).send().await.unwrap();
    assert_eq!(response.status(), 400);

    // Broken base64url.
    let response = client
        .get(format!("{}?dns=!!notbase64!!", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Wrong media type on POST.
    let response = client
        .post(&harness.base)
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Other methods answer 405.
    let response = client.put(&harness.base).body("x").send().await.unwrap();
    assert_eq!(response.status(), 405);

    let _ = harness.shutdown.send(());
}
