//! Wire codec round-trips and malformed-input behavior.

use mimir::dns::enums::{RecordClass, RecordType};
use mimir::dns::name::{canonical_cmp, fqdn, labels_from};
use mimir::dns::rdata::{RData, SoaData};
use mimir::dns::{Edns, EdnsOption, Packet, Question, ResourceRecord, WireError};
use mimir::pool::PacketBuffer;

fn rr(owner: &str, rtype: RecordType, rdata: RData) -> ResourceRecord {
    ResourceRecord::new(owner, rtype, 300, rdata)
}

fn round_trip(packet: &Packet) -> Packet {
    Packet::parse(&packet.to_bytes().unwrap()).unwrap()
}

#[test]
fn full_packet_round_trip() {
    let mut packet = Packet::default();
    packet.header.id = 0xbeef;
    packet.header.qr = true;
    packet.header.aa = true;
    packet
        .questions
        .push(Question::new("www.example.com", RecordType::A));
    packet.answers.push(rr(
        "www.example.com",
        RecordType::A,
        RData::A("1.2.3.4".parse().unwrap()),
    ));
    packet.authorities.push(rr(
        "example.com",
        RecordType::SOA,
        RData::Soa(SoaData {
            mname: labels_from("ns1.example.com"),
            rname: labels_from("admin.example.com"),
            serial: 2024010101,
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 86400,
        }),
    ));
    packet.additionals.push(rr(
        "ns1.example.com",
        RecordType::A,
        RData::A("10.0.0.53".parse().unwrap()),
    ));

    let parsed = round_trip(&packet);
    assert_eq!(parsed.header.id, 0xbeef);
    assert_eq!(parsed.questions, packet.questions);
    assert_eq!(parsed.answers, packet.answers);
    assert_eq!(parsed.authorities, packet.authorities);
    assert_eq!(parsed.additionals, packet.additionals);
}

#[test]
fn every_supported_rdata_round_trips() {
    let cases: Vec<(RecordType, RData)> = vec![
        (RecordType::A, RData::A("192.0.2.1".parse().unwrap())),
        (RecordType::AAAA, RData::Aaaa("2001:db8::1".parse().unwrap())),
        (RecordType::NS, RData::Name(labels_from("ns1.example.com"))),
        (RecordType::CNAME, RData::Name(labels_from("target.example.com"))),
        (RecordType::PTR, RData::Name(labels_from("host.example.com"))),
        (
            RecordType::MX,
            RData::Mx {
                preference: 10,
                exchange: labels_from("mail.example.com"),
            },
        ),
        (RecordType::TXT, RData::Txt(vec!["v=spf1 -all".to_string()])),
        (
            RecordType::SRV,
            RData::Srv {
                priority: 0,
                weight: 5,
                port: 443,
                target: labels_from("svc.example.com"),
            },
        ),
        (
            RecordType::HINFO,
            RData::Hinfo {
                cpu: "AMD64".to_string(),
                os: "Linux".to_string(),
            },
        ),
        (
            RecordType::MINFO,
            RData::Minfo {
                rmailbx: labels_from("admin.example.com"),
                emailbx: labels_from("errors.example.com"),
            },
        ),
        (
            RecordType::DNSKEY,
            RData::Dnskey {
                flags: 256,
                protocol: 3,
                algorithm: 13,
                public_key: vec![0x55; 64],
            },
        ),
        (
            RecordType::DS,
            RData::Ds {
                key_tag: 12345,
                algorithm: 13,
                digest_type: 2,
                digest: vec![0x11; 32],
            },
        ),
        (
            RecordType::NSEC,
            RData::Nsec {
                next: labels_from("b.example.com"),
                type_bitmap: vec![0, 1, 0x40],
            },
        ),
        (
            RecordType::NSEC3,
            RData::Nsec3 {
                hash_alg: 1,
                flags: 0,
                iterations: 10,
                salt: vec![0xab, 0xcd],
                next_hash: vec![0x77; 20],
                type_bitmap: vec![0, 1, 0x40],
            },
        ),
        (
            RecordType::NSEC3PARAM,
            RData::Nsec3Param {
                hash_alg: 1,
                flags: 0,
                iterations: 10,
                salt: vec![0xab, 0xcd],
            },
        ),
        (
            RecordType::RRSIG,
            RData::Rrsig {
                type_covered: 1,
                algorithm: 13,
                labels: 3,
                original_ttl: 300,
                expiration: 1735689600,
                inception: 1733097600,
                key_tag: 4711,
                signer: labels_from("example.com"),
                signature: vec![0x99; 64],
            },
        ),
    ];

    for (rtype, rdata) in cases {
        let mut packet = Packet::default();
        packet.header.id = 1;
        packet.header.qr = true;
        packet.answers.push(rr("x.example.com", rtype, rdata.clone()));
        let parsed = round_trip(&packet);
        assert_eq!(parsed.answers[0].rtype, rtype, "type {:?}", rtype);
        assert_eq!(parsed.answers[0].rdata, rdata, "rdata {:?}", rtype);
    }
}

#[test]
fn names_round_trip_lowercased_with_trailing_dot() {
    for input in [
        "Example.COM",
        "a.b.c.d.e.example.com",
        "xn--bcher-kva.example",
        "_sip._tcp.Example.Com",
    ] {
        let labels = labels_from(input);
        let mut buf = PacketBuffer::new();
        mimir::dns::name::write_name(&mut buf, &labels, true).unwrap();
        let bytes = buf.as_slice().to_vec();
        let mut parse = PacketBuffer::new();
        parse.load(&bytes).unwrap();
        let parsed = mimir::dns::name::read_name(&mut parse).unwrap();
        assert_eq!(fqdn(&parsed), format!("{}.", input.to_lowercase()));
    }
}

#[test]
fn compression_is_transparent() {
    let mut packet = Packet::default();
    packet.header.id = 2;
    packet.header.qr = true;
    for host in ["a", "b", "c", "d"] {
        packet.answers.push(rr(
            &format!("{}.deep.subdomain.example.com", host),
            RecordType::NS,
            RData::Name(labels_from("ns1.deep.subdomain.example.com")),
        ));
    }
    let bytes = packet.to_bytes().unwrap();

    // Shared suffixes collapse into pointers.
    let uncompressed_guess: usize = packet
        .answers
        .iter()
        .map(|a| a.name().len() + 2 + 30)
        .sum();
    assert!(bytes.len() < uncompressed_guess);

    let parsed = Packet::parse(&bytes).unwrap();
    assert_eq!(parsed.answers, packet.answers);
}

#[test]
fn unknown_type_and_edns_options_are_preserved() {
    let mut packet = Packet::default();
    packet.header.id = 3;
    packet.answers.push(ResourceRecord {
        labels: labels_from("odd.example.com"),
        rtype: RecordType::Unknown(4096),
        rclass: RecordClass::IN,
        ttl: 60,
        rdata: RData::Unknown(vec![9, 8, 7, 6]),
    });
    packet.edns = Some(Edns {
        payload_size: 1400,
        options: vec![EdnsOption {
            code: 0xfde9,
            data: vec![1, 2, 3, 4],
        }],
        ..Edns::default()
    });

    let parsed = round_trip(&packet);
    assert_eq!(parsed.answers[0].rtype, RecordType::Unknown(4096));
    assert_eq!(parsed.answers[0].rdata, RData::Unknown(vec![9, 8, 7, 6]));
    let edns = parsed.edns.unwrap();
    assert_eq!(edns.options.len(), 1);
    assert_eq!(edns.options[0].code, 0xfde9);
    assert_eq!(edns.options[0].data, vec![1, 2, 3, 4]);
}

#[test]
fn truncated_inputs_error_cleanly() {
    let mut packet = Packet::default();
    packet.header.id = 4;
    packet
        .questions
        .push(Question::new("www.example.com", RecordType::A));
    let bytes = packet.to_bytes().unwrap();

    // Every prefix must fail without panicking.
    for cut in 1..bytes.len() {
        assert!(Packet::parse(&bytes[..cut]).is_err(), "prefix {}", cut);
    }
}

#[test]
fn count_lying_header_is_rejected() {
    let mut packet = Packet::default();
    packet.header.id = 5;
    packet
        .questions
        .push(Question::new("www.example.com", RecordType::A));
    let mut bytes = packet.to_bytes().unwrap();
    bytes[5] = 4; // qdcount = 4 with only one question present
    assert!(Packet::parse(&bytes).is_err());
}

#[test]
fn pointer_loop_is_bounded() {
    // Header + a question name that is a two-pointer cycle.
    let mut bytes = vec![
        0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    bytes.extend_from_slice(&[0xC0, 0x0E, 0xC0, 0x0C]); // 12 -> 14 -> 12 ...
    bytes.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    let result = Packet::parse(&bytes);
    assert!(matches!(result, Err(WireError::PointerLoop)));
}

#[test]
fn canonical_order_examples() {
    let mut names = vec![
        labels_from("z.example.com"),
        labels_from("a.example.com"),
        labels_from("example.com"),
        labels_from("sub.a.example.com"),
    ];
    names.sort_by(|a, b| canonical_cmp(a, b));
    let rendered: Vec<String> = names.iter().map(|n| fqdn(n)).collect();
    assert_eq!(
        rendered,
        vec![
            "example.com.",
            "a.example.com.",
            "sub.a.example.com.",
            "z.example.com.",
        ]
    );
}
