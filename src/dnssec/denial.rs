//! Authenticated denial of existence.
//!
//! NXDOMAIN answers carry an NSEC record spanning the gap around the query
//! name in canonical order; NODATA answers carry an NSEC at the query name
//! listing the types that do exist. NSEC3 owner hashing is provided for
//! zones that store NSEC3 material.

use base32::Alphabet;
use ring::digest;
use std::cmp::Ordering;

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::rdata::RData;
use crate::dns::{ResourceRecord, name};
use crate::model::Record;

/// Encode the RFC 4034 §4.1.2 type bitmap: 256-type windows, each with a
/// length-prefixed bit field.
pub fn encode_type_bitmap(types: &[u16]) -> Vec<u8> {
    let mut sorted: Vec<u16> = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut bitmap = Vec::new();
    let mut window = 0u8;
    let mut bits = [0u8; 32];
    let mut max_octet = 0usize;
    let mut dirty = false;

    let flush = |bitmap: &mut Vec<u8>, window: u8, bits: &[u8; 32], max_octet: usize| {
        bitmap.push(window);
        bitmap.push(max_octet as u8 + 1);
        bitmap.extend_from_slice(&bits[..=max_octet]);
    };

    for t in sorted {
        let w = (t >> 8) as u8;
        if w != window && dirty {
            flush(&mut bitmap, window, &bits, max_octet);
            bits = [0u8; 32];
            max_octet = 0;
            dirty = false;
        }
        window = w;
        let low = (t & 0xFF) as usize;
        bits[low / 8] |= 0x80 >> (low % 8);
        max_octet = max_octet.max(low / 8);
        dirty = true;
    }
    if dirty {
        flush(&mut bitmap, window, &bits, max_octet);
    }
    bitmap
}

/// Decode a type bitmap back into numeric types (used by tests and AXFR
/// consumers).
pub fn decode_type_bitmap(bitmap: &[u8]) -> Vec<u16> {
    let mut types = Vec::new();
    let mut i = 0;
    while i + 1 < bitmap.len() {
        let window = bitmap[i] as u16;
        let len = bitmap[i + 1] as usize;
        for (octet, &byte) in bitmap[i + 2..i + 2 + len.min(bitmap.len() - i - 2)]
            .iter()
            .enumerate()
        {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    types.push((window << 8) | (octet as u16 * 8 + bit as u16));
                }
            }
        }
        i += 2 + len;
    }
    types
}

/// Owner names and their types, the view of a zone the denial logic needs.
fn owners(records: &[Record], apex: &str) -> Vec<(Vec<String>, Vec<u16>)> {
    let apex_lower = apex.trim_end_matches('.').to_lowercase();
    let mut seen: Vec<(String, Vec<u16>)> = vec![(apex_lower, Vec::new())];

    for record in records {
        let owner = record.name.clone();
        let code = u16::from(record.rtype);
        match seen.iter_mut().find(|(name, _)| *name == owner) {
            Some((_, types)) => types.push(code),
            None => seen.push((owner, vec![code])),
        }
    }

    let mut result: Vec<(Vec<String>, Vec<u16>)> = seen
        .into_iter()
        .map(|(owner, types)| (name::labels_from(&owner), types))
        .collect();
    result.sort_by(|a, b| name::canonical_cmp(&a.0, &b.0));
    result
}

/// NSEC proving the query name does not exist: owner is the largest
/// existing name at or before the query, `next` the smallest after it
/// (wrapping to the apex at the end of the zone).
pub fn nsec_for_nxdomain(records: &[Record], apex: &str, qname: &str, ttl: u32) -> ResourceRecord {
    let names = owners(records, apex);
    let query = name::labels_from(qname);

    let mut owner = &names[0];
    let mut next: Option<&(Vec<String>, Vec<u16>)> = None;
    for entry in &names {
        match name::canonical_cmp(&entry.0, &query) {
            Ordering::Less | Ordering::Equal => owner = entry,
            Ordering::Greater => {
                next = Some(entry);
                break;
            }
        }
    }
    let next_labels = next.map(|entry| entry.0.clone()).unwrap_or_else(|| names[0].0.clone());

    build_nsec(owner.0.clone(), &owner.1, next_labels, ttl)
}

/// NSEC proving a type is absent at an existing name: owner is the query
/// name itself, the bitmap lists what does exist there.
pub fn nsec_for_nodata(records: &[Record], apex: &str, qname: &str, ttl: u32) -> ResourceRecord {
    let names = owners(records, apex);
    let query = name::labels_from(qname);

    let present: Vec<u16> = names
        .iter()
        .find(|(owner, _)| name::canonical_cmp(owner, &query) == Ordering::Equal)
        .map(|(_, types)| types.clone())
        .unwrap_or_default();

    let next = names
        .iter()
        .find(|(owner, _)| name::canonical_cmp(owner, &query) == Ordering::Greater)
        .map(|(owner, _)| owner.clone())
        .unwrap_or_else(|| names[0].0.clone());

    build_nsec(query, &present, next, ttl)
}

fn build_nsec(
    owner: Vec<String>,
    present_types: &[u16],
    next: Vec<String>,
    ttl: u32,
) -> ResourceRecord {
    let mut types = present_types.to_vec();
    types.push(RecordType::NSEC.into());
    types.push(RecordType::RRSIG.into());

    ResourceRecord {
        labels: owner,
        rtype: RecordType::NSEC,
        rclass: RecordClass::IN,
        ttl,
        rdata: RData::Nsec {
            next,
            type_bitmap: encode_type_bitmap(&types),
        },
    }
}

/// RFC 5155 §5 owner-name hash: iterated SHA-1 over the canonical wire
/// name with the salt appended each round, base32hex encoded lowercase.
pub fn nsec3_hash(qname: &str, salt: &[u8], iterations: u16) -> String {
    let labels = name::labels_from(qname);
    let mut input = name::canonical_wire(&labels);
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input)
        .as_ref()
        .to_vec();
    for _ in 0..iterations {
        let mut round = hash.clone();
        round.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &round)
            .as_ref()
            .to_vec();
    }

    base32::encode(Alphabet::Rfc4648Hex { padding: false }, &hash).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::name::labels_from;
    use uuid::Uuid;

    fn zone_records() -> Vec<Record> {
        let zone_id = Uuid::new_v4();
        vec![
            Record::new(zone_id, "example.com", RecordType::SOA,
                "ns1.example.com. admin.example.com. 1 3600 900 604800 86400", 3600),
            Record::new(zone_id, "a.example.com", RecordType::A, "1.1.1.1", 300),
            Record::new(zone_id, "z.example.com", RecordType::A, "2.2.2.2", 300),
        ]
    }

    #[test]
    fn bitmap_round_trip() {
        let types: Vec<u16> = vec![1, 2, 6, 15, 16, 46, 47, 257];
        let bitmap = encode_type_bitmap(&types);
        let mut decoded = decode_type_bitmap(&bitmap);
        decoded.sort_unstable();
        assert_eq!(decoded, types);
    }

    #[test]
    fn bitmap_for_a_and_nsec() {
        // A(1) and NSEC(47) live in window 0.
        let bitmap = encode_type_bitmap(&[1, 47]);
        assert_eq!(bitmap[0], 0);
        assert_eq!(bitmap[1], 6);
        assert_eq!(bitmap[2] & 0x40, 0x40); // bit 1 = A
    }

    #[test]
    fn nxdomain_gap_spans_the_query() {
        let records = zone_records();
        let nsec = nsec_for_nxdomain(&records, "example.com.", "b.example.com", 86400);

        assert_eq!(nsec.labels, labels_from("a.example.com"));
        match &nsec.rdata {
            RData::Nsec { next, type_bitmap } => {
                assert_eq!(next, &labels_from("z.example.com"));
                let types = decode_type_bitmap(type_bitmap);
                assert!(types.contains(&1)); // A exists at the owner
                assert!(types.contains(&47));
            }
            other => panic!("expected NSEC, got {:?}", other),
        }
    }

    #[test]
    fn nxdomain_past_the_last_name_wraps_to_apex() {
        let records = zone_records();
        let nsec = nsec_for_nxdomain(&records, "example.com.", "zz.example.com", 86400);
        assert_eq!(nsec.labels, labels_from("z.example.com"));
        match &nsec.rdata {
            RData::Nsec { next, .. } => assert_eq!(next, &labels_from("example.com")),
            other => panic!("expected NSEC, got {:?}", other),
        }
    }

    #[test]
    fn nodata_lists_existing_types() {
        let records = zone_records();
        let nsec = nsec_for_nodata(&records, "example.com.", "a.example.com", 86400);
        assert_eq!(nsec.labels, labels_from("a.example.com"));
        match &nsec.rdata {
            RData::Nsec { type_bitmap, .. } => {
                let types = decode_type_bitmap(type_bitmap);
                assert!(types.contains(&u16::from(RecordType::A)));
                assert!(!types.contains(&u16::from(RecordType::AAAA)));
            }
            other => panic!("expected NSEC, got {:?}", other),
        }
    }

    #[test]
    fn nsec3_hash_is_deterministic_and_salted() {
        let plain = nsec3_hash("example.com", &[], 0);
        assert!(!plain.is_empty());
        assert_eq!(plain, nsec3_hash("EXAMPLE.com.", &[], 0));
        assert_ne!(plain, nsec3_hash("example.com", &[0xaa, 0xbb], 0));
        assert_ne!(plain, nsec3_hash("example.com", &[], 5));
    }
}
