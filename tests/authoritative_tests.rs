//! Authoritative answering end to end: direct, wildcard, ANY, CNAME,
//! split-horizon scopes, caching and truncation.

mod common;

use common::{engine, query, query_with_edns};
use mimir::dns::enums::{RecordType, Rcode};
use mimir::dns::rdata::RData;
use mimir::server::{Reply, Transport};

#[tokio::test]
async fn a_lookup_mixed_case() {
    let server = engine();
    server.seed_example_zone();

    let wire = query("WWW.EXAMPLE.COM.", RecordType::A, 0x1234);
    let response = server.ask(&wire, Transport::Udp).await;

    assert_eq!(response.header.id, 0x1234);
    assert!(response.header.qr);
    assert!(response.header.aa);
    assert_eq!(response.header.rcode, Rcode::NoError.to_u8());
    assert_eq!(response.answers.len(), 1);
    let answer = &response.answers[0];
    assert_eq!(answer.fqdn(), "www.example.com.");
    assert_eq!(answer.rtype, RecordType::A);
    assert_eq!(answer.ttl, 300);
    assert_eq!(answer.rdata, RData::A("1.2.3.4".parse().unwrap()));
}

#[tokio::test]
async fn wildcard_answers_with_query_name() {
    let server = engine();
    let zone = server.seed_example_zone();
    server.add_record(&zone, "*.example.com", RecordType::TXT, "wildcard", 60);

    let wire = query("foo.example.com", RecordType::TXT, 0x77);
    let response = server.ask(&wire, Transport::Udp).await;

    assert_eq!(response.header.rcode, 0);
    assert_eq!(response.answers.len(), 1);
    assert_eq!(response.answers[0].fqdn(), "foo.example.com.");
    assert_eq!(response.answers[0].rdata, RData::Txt(vec!["wildcard".into()]));
}

#[tokio::test]
async fn cname_chain_is_flattened() {
    let server = engine();
    let zone = server.seed_example_zone();
    server.add_record(&zone, "alias.example.com", RecordType::CNAME, "www.example.com.", 300);

    let wire = query("alias.example.com", RecordType::A, 1);
    let response = server.ask(&wire, Transport::Udp).await;

    assert_eq!(response.answers.len(), 2);
    assert_eq!(response.answers[0].rtype, RecordType::CNAME);
    assert_eq!(response.answers[1].rtype, RecordType::A);
}

#[tokio::test]
async fn any_query_returns_all_types() {
    let server = engine();
    let zone = server.seed_example_zone();
    server.add_record(&zone, "www.example.com", RecordType::TXT, "hello", 60);

    let wire = query("www.example.com", RecordType::ANY, 2);
    let response = server.ask(&wire, Transport::Udp).await;
    let types: Vec<RecordType> = response.answers.iter().map(|a| a.rtype).collect();
    assert!(types.contains(&RecordType::A));
    assert!(types.contains(&RecordType::TXT));
}

#[tokio::test]
async fn scoped_record_wins_for_matching_client() {
    let server = engine();
    let zone = server.seed_example_zone();
    let mut scoped = mimir::model::Record::new(
        zone.id,
        "www.example.com",
        RecordType::A,
        "10.9.9.9",
        300,
    );
    scoped.scope = Some("198.51.100.0/24".parse().unwrap());
    server.repo.add_record(scoped);

    // common::client() is 198.51.100.7, inside the scope.
    let wire = query("www.example.com", RecordType::A, 3);
    let response = server.ask(&wire, Transport::Udp).await;
    assert_eq!(response.answers.len(), 1);
    assert_eq!(response.answers[0].rdata, RData::A("10.9.9.9".parse().unwrap()));
}

#[tokio::test]
async fn nodata_and_nxdomain_are_distinct() {
    let server = engine();
    server.seed_example_zone();

    // Existing name, missing type: NOERROR with SOA.
    let nodata = server
        .ask(&query("www.example.com", RecordType::AAAA, 4), Transport::Udp)
        .await;
    assert_eq!(nodata.header.rcode, Rcode::NoError.to_u8());
    assert!(nodata.answers.is_empty());
    assert_eq!(nodata.authorities[0].rtype, RecordType::SOA);

    // Missing name: NXDOMAIN with SOA.
    let nxdomain = server
        .ask(&query("nope.example.com", RecordType::A, 5), Transport::Udp)
        .await;
    assert_eq!(nxdomain.header.rcode, Rcode::NxDomain.to_u8());
    assert_eq!(nxdomain.authorities[0].rtype, RecordType::SOA);
}

#[tokio::test]
async fn cache_round_trip_rewrites_id() {
    let server = engine();
    server.seed_example_zone();

    let first = server
        .ask(&query("www.example.com", RecordType::A, 0x1111), Transport::Udp)
        .await;
    assert_eq!(first.header.id, 0x1111);
    assert_eq!(server.engine.metrics.cache_misses.get(), 1);

    let second = server
        .ask(&query("www.example.com", RecordType::A, 0x2222), Transport::Udp)
        .await;
    assert_eq!(second.header.id, 0x2222);
    assert_eq!(second.answers, first.answers);
    assert_eq!(server.engine.metrics.cache_hits.get(), 1);
}

#[tokio::test]
async fn invalidation_evicts_cached_answer() {
    let server = engine();
    server.seed_example_zone();

    // Prime the cache, then publish an invalidation and drain it through
    // the bridge.
    server
        .ask(&query("www.example.com", RecordType::A, 1), Transport::Udp)
        .await;

    let bridge = mimir::invalidation::InvalidationBridge::new(
        server.engine.cache(),
        server.invalidator.clone(),
    );
    let (tx, _) = tokio::sync::broadcast::channel(1);
    let rx = tx.subscribe();
    let handle = tokio::spawn(async move { bridge.run(rx).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    use mimir::traits::CacheInvalidator;
    server
        .invalidator
        .publish("www.example.com", RecordType::A)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Next ask misses again.
    server
        .ask(&query("www.example.com", RecordType::A, 2), Transport::Udp)
        .await;
    assert_eq!(server.engine.metrics.cache_misses.get(), 2);

    let _ = tx.send(());
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn truncation_with_and_without_edns() {
    let server = engine();
    let zone = server.seed_example_zone();
    for i in 0..50u8 {
        server.add_record(
            &zone,
            "many.example.com",
            RecordType::A,
            &format!("10.0.0.{}", i),
            300,
        );
    }

    // No EDNS: 512-byte limit forces TC with an empty answer section.
    let plain = server
        .ask(&query("many.example.com", RecordType::A, 0x50), Transport::Udp)
        .await;
    assert!(plain.header.tc);
    assert_eq!(plain.header.ancount, 0);
    assert_eq!(plain.header.qdcount, 1);

    // EDNS 4096: everything fits.
    let wide = server
        .ask(
            &query_with_edns("many.example.com", RecordType::A, 0x51, 4096, false),
            Transport::Udp,
        )
        .await;
    assert!(!wide.header.tc);
    assert_eq!(wide.answers.len(), 50);

    // TCP never truncates.
    let tcp = server
        .ask(&query("many.example.com", RecordType::A, 0x52), Transport::Tcp)
        .await;
    assert!(!tcp.header.tc);
    assert_eq!(tcp.answers.len(), 50);
}

#[tokio::test]
async fn rate_limited_clients_get_nothing() {
    let server = common::engine_with(mimir::config::ServerConfig {
        rate_limit_refill: 1.0,
        rate_limit_burst: 2.0,
        ..mimir::config::ServerConfig::default()
    });
    server.seed_example_zone();

    let wire = query("www.example.com", RecordType::A, 1);
    let _ = server.engine.handle(&wire, common::client(), Transport::Udp).await;
    let _ = server.engine.handle(&wire, common::client(), Transport::Udp).await;
    match server.engine.handle(&wire, common::client(), Transport::Udp).await {
        Reply::RateLimited => {}
        _ => panic!("expected rate limiting after the burst"),
    }
}
