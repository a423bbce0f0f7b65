//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use mimir::config::ServerConfig;
use mimir::dns::enums::RecordType;
use mimir::dns::{Packet, Question};
use mimir::invalidation::MemoryInvalidator;
use mimir::model::{Record, Zone};
use mimir::repository::MemoryRepository;
use mimir::server::{Engine, Reply, Transport};

pub const CLIENT: &str = "198.51.100.7:53535";

pub fn client() -> SocketAddr {
    CLIENT.parse().unwrap()
}

pub struct TestServer {
    pub repo: Arc<MemoryRepository>,
    pub invalidator: Arc<MemoryInvalidator>,
    pub engine: Arc<Engine>,
}

/// An engine over an in-memory repository, recursion off so misses stay
/// local and deterministic.
pub fn engine_with(config: ServerConfig) -> TestServer {
    let repo = Arc::new(MemoryRepository::new());
    let invalidator = Arc::new(MemoryInvalidator::new());
    let config = ServerConfig {
        recursion_enabled: false,
        ..config
    };
    let engine = Engine::new(config, repo.clone(), invalidator.clone());
    TestServer {
        repo,
        invalidator,
        engine,
    }
}

pub fn engine() -> TestServer {
    engine_with(ServerConfig::default())
}

impl TestServer {
    /// Add `example.com.` with an SOA (serial 1) and `www` A record.
    pub fn seed_example_zone(&self) -> Zone {
        let zone = Zone::new("acme", "example.com.");
        let zone_id = zone.id;
        self.repo.add_zone(zone.clone());
        self.repo.add_record(Record::new(
            zone_id,
            "example.com",
            RecordType::SOA,
            "ns1.example.com. admin.example.com. 1 3600 900 604800 86400",
            3600,
        ));
        self.repo.add_record(Record::new(
            zone_id,
            "www.example.com",
            RecordType::A,
            "1.2.3.4",
            300,
        ));
        zone
    }

    pub fn add_record(&self, zone: &Zone, name: &str, rtype: RecordType, content: &str, ttl: u32) {
        self.repo
            .add_record(Record::new(zone.id, name, rtype, content, ttl));
    }

    /// Run a query through the pipeline and parse the single response.
    pub async fn ask(&self, wire: &[u8], transport: Transport) -> Packet {
        match self.engine.handle(wire, client(), transport).await {
            Reply::Messages(messages) => Packet::parse(&messages[0]).unwrap(),
            _ => panic!("expected a response message"),
        }
    }

    pub async fn ask_messages(&self, wire: &[u8], transport: Transport) -> Vec<Vec<u8>> {
        match self.engine.handle(wire, client(), transport).await {
            Reply::Messages(messages) => messages,
            _ => panic!("expected response messages"),
        }
    }
}

pub fn query(name: &str, qtype: RecordType, id: u16) -> Vec<u8> {
    let mut packet = Packet::default();
    packet.header.id = id;
    packet.questions.push(Question::new(name, qtype));
    packet.to_bytes().unwrap()
}

pub fn query_with_edns(name: &str, qtype: RecordType, id: u16, payload: u16, do_bit: bool) -> Vec<u8> {
    let mut packet = Packet::default();
    packet.header.id = id;
    packet.questions.push(Question::new(name, qtype));
    let mut edns = mimir::dns::Edns::with_payload(payload);
    edns.set_dnssec_ok(do_bit);
    packet.edns = Some(edns);
    packet.to_bytes().unwrap()
}
