use criterion::{Criterion, black_box, criterion_group, criterion_main};

use mimir::dns::enums::RecordType;
use mimir::dns::rdata::RData;
use mimir::dns::{Packet, Question, ResourceRecord};
use mimir::pool::PacketBuffer;

fn sample_query() -> Vec<u8> {
    let mut packet = Packet::default();
    packet.header.id = 0x1234;
    packet.header.rd = true;
    packet
        .questions
        .push(Question::new("www.example.com", RecordType::A));
    packet.to_bytes().unwrap()
}

fn sample_response() -> Packet {
    let mut packet = Packet::default();
    packet.header.id = 0x1234;
    packet.header.qr = true;
    packet.header.aa = true;
    packet
        .questions
        .push(Question::new("www.example.com", RecordType::A));
    for i in 0..8u8 {
        packet.answers.push(ResourceRecord::new(
            "www.example.com",
            RecordType::A,
            300,
            RData::A(format!("10.0.0.{}", i).parse().unwrap()),
        ));
    }
    packet
}

fn bench_parse(c: &mut Criterion) {
    let query = sample_query();
    let response = sample_response().to_bytes().unwrap();

    c.bench_function("parse_query", |b| {
        b.iter(|| Packet::parse(black_box(&query)).unwrap())
    });
    c.bench_function("parse_response_8_answers", |b| {
        b.iter(|| Packet::parse(black_box(&response)).unwrap())
    });
}

fn bench_serialize(c: &mut Criterion) {
    let response = sample_response();
    let mut buf = PacketBuffer::new();

    c.bench_function("serialize_response_8_answers", |b| {
        b.iter(|| {
            response.serialize(black_box(&mut buf)).unwrap().len()
        })
    });
}

criterion_group!(benches, bench_parse, bench_serialize);
criterion_main!(benches);
