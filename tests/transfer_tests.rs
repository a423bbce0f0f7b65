//! AXFR and IXFR through the dispatcher.

mod common;

use common::query;
use mimir::dns::enums::{RecordType, Rcode};
use mimir::dns::name::labels_from;
use mimir::dns::rdata::{RData, SoaData};
use mimir::dns::{Packet, Question, ResourceRecord};
use mimir::model::{ChangeAction, Record, Zone, ZoneChange};
use mimir::server::Transport;
use mimir::traits::Repository;

fn seed_transfer_zone(server: &common::TestServer, serial: u32) -> Zone {
    let zone = Zone::new("t", "example.com.");
    let zone_id = zone.id;
    server.repo.add_zone(zone.clone());
    server.repo.add_record(Record::new(
        zone_id,
        "example.com",
        RecordType::SOA,
        &format!(
            "ns1.example.com. admin.example.com. {} 3600 900 604800 86400",
            serial
        ),
        3600,
    ));
    server
        .repo
        .add_record(Record::new(zone_id, "example.com", RecordType::NS, "ns1.example.com.", 3600));
    server
        .repo
        .add_record(Record::new(zone_id, "www.example.com", RecordType::A, "1.2.3.4", 300));
    zone
}

fn ixfr_query(zone: &str, id: u16, client_serial: u32) -> Vec<u8> {
    let mut packet = Packet::default();
    packet.header.id = id;
    packet.questions.push(Question::new(zone, RecordType::IXFR));
    packet.authorities.push(ResourceRecord::new(
        zone,
        RecordType::SOA,
        0,
        RData::Soa(SoaData {
            mname: labels_from("ns1.example.com"),
            rname: labels_from("admin.example.com"),
            serial: client_serial,
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 86400,
        }),
    ));
    packet.to_bytes().unwrap()
}

fn soa_serials(packet: &Packet) -> Vec<Option<u32>> {
    packet
        .answers
        .iter()
        .map(|rr| match &rr.rdata {
            RData::Soa(soa) => Some(soa.serial),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn axfr_over_tcp_brackets_the_zone() {
    let server = common::engine();
    seed_transfer_zone(&server, 42);

    let messages = server
        .ask_messages(&query("example.com", RecordType::AXFR, 1), Transport::Tcp)
        .await;
    let first = Packet::parse(&messages[0]).unwrap();
    let last = Packet::parse(messages.last().unwrap()).unwrap();

    assert_eq!(first.answers.first().unwrap().rtype, RecordType::SOA);
    assert_eq!(last.answers.last().unwrap().rtype, RecordType::SOA);

    let total: usize = messages
        .iter()
        .map(|m| Packet::parse(m).unwrap().answers.len())
        .sum();
    // SOA + NS + A + SOA
    assert_eq!(total, 4);
}

#[tokio::test]
async fn axfr_over_udp_is_refused() {
    let server = common::engine();
    seed_transfer_zone(&server, 42);

    let response = server
        .ask(&query("example.com", RecordType::AXFR, 2), Transport::Udp)
        .await;
    assert_eq!(response.header.rcode, Rcode::Refused.to_u8());
}

#[tokio::test]
async fn axfr_for_unknown_zone_is_notauth() {
    let server = common::engine();
    let response = server
        .ask(&query("stranger.zone", RecordType::AXFR, 3), Transport::Tcp)
        .await;
    assert_eq!(response.header.rcode, Rcode::NotAuth.to_u8());
}

#[tokio::test]
async fn ixfr_single_delta() {
    let server = common::engine();
    let zone = seed_transfer_zone(&server, 11);
    server
        .repo
        .record_zone_change(ZoneChange::new(
            zone.id,
            11,
            ChangeAction::Add,
            "dyn.example.com",
            RecordType::A,
            "5.5.5.5",
            300,
        ))
        .await
        .unwrap();

    let messages = server
        .ask_messages(&ixfr_query("example.com", 4, 10), Transport::Tcp)
        .await;
    let response = Packet::parse(&messages[0]).unwrap();

    // SOA(11), SOA(10), [no deletes], SOA(11), the add, SOA(11).
    assert_eq!(
        soa_serials(&response),
        vec![Some(11), Some(10), Some(11), None, Some(11)]
    );
    assert_eq!(response.answers[3].name(), "dyn.example.com");
}

#[tokio::test]
async fn ixfr_current_client_gets_soa_only() {
    let server = common::engine();
    seed_transfer_zone(&server, 11);

    let messages = server
        .ask_messages(&ixfr_query("example.com", 5, 11), Transport::Tcp)
        .await;
    let response = Packet::parse(&messages[0]).unwrap();
    assert_eq!(soa_serials(&response), vec![Some(11)]);
}

#[tokio::test]
async fn ixfr_truncated_journal_falls_back_to_axfr() {
    let server = common::engine();
    let zone = seed_transfer_zone(&server, 20);
    // Journal starts at serial 19; the client asks from 3.
    server
        .repo
        .record_zone_change(ZoneChange::new(
            zone.id,
            19,
            ChangeAction::Add,
            "late.example.com",
            RecordType::A,
            "9.9.9.9",
            60,
        ))
        .await
        .unwrap();

    let messages = server
        .ask_messages(&ixfr_query("example.com", 6, 3), Transport::Tcp)
        .await;
    let response = Packet::parse(&messages[0]).unwrap();

    // AXFR shape with the IXFR question preserved.
    assert_eq!(response.questions[0].qtype, RecordType::IXFR);
    assert_eq!(response.answers.first().unwrap().rtype, RecordType::SOA);
    assert_eq!(response.answers.last().unwrap().rtype, RecordType::SOA);
    assert!(response.answers.len() >= 4);
}

#[tokio::test]
async fn ixfr_over_udp_works_for_small_deltas() {
    let server = common::engine();
    let zone = seed_transfer_zone(&server, 11);
    server
        .repo
        .record_zone_change(ZoneChange::new(
            zone.id,
            11,
            ChangeAction::Add,
            "dyn.example.com",
            RecordType::A,
            "5.5.5.5",
            300,
        ))
        .await
        .unwrap();

    let messages = server
        .ask_messages(&ixfr_query("example.com", 7, 10), Transport::Udp)
        .await;
    let response = Packet::parse(&messages[0]).unwrap();
    assert!(!response.header.tc);
    assert_eq!(response.answers.len(), 5);
}
