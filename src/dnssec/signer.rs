//! RRSIG generation over canonical RRsets (RFC 4034 §3.1.8.1, §6).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ring::rand::SystemRandom;

use super::ActiveKey;
use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::rdata::RData;
use crate::dns::{ResourceRecord, name};
use crate::error::{DnsError, Result};

/// Sign one RRset with one key. All records must share owner, type and TTL;
/// the RRSIG is returned as a sibling record of the set.
pub fn sign_rrset(
    rrset: &[&ResourceRecord],
    apex: &[String],
    key: &ActiveKey,
    now: DateTime<Utc>,
    validity: ChronoDuration,
) -> Result<ResourceRecord> {
    let first = rrset
        .first()
        .ok_or_else(|| DnsError::Signing("empty rrset".into()))?;

    let inception = now.timestamp() as u32;
    let expiration = (now + validity).timestamp() as u32;
    let label_count = first.labels.len() as u8;

    // RRSIG RDATA minus the signature, with the signer name canonical.
    let mut message = Vec::with_capacity(512);
    message.extend_from_slice(&u16::from(first.rtype).to_be_bytes());
    message.push(key.meta.algorithm);
    message.push(label_count);
    message.extend_from_slice(&first.ttl.to_be_bytes());
    message.extend_from_slice(&expiration.to_be_bytes());
    message.extend_from_slice(&inception.to_be_bytes());
    message.extend_from_slice(&key.key_tag().to_be_bytes());
    message.extend_from_slice(&name::canonical_wire(apex));

    // Records in canonical RDATA order, owner lowercased, no compression.
    let mut canonical: Vec<Vec<u8>> = rrset.iter().map(|rr| rr.rdata.canonical_bytes()).collect();
    canonical.sort();
    let owner = first.canonical_owner();
    for rdata in &canonical {
        message.extend_from_slice(&owner);
        message.extend_from_slice(&u16::from(first.rtype).to_be_bytes());
        message.extend_from_slice(&u16::from(RecordClass::IN).to_be_bytes());
        message.extend_from_slice(&first.ttl.to_be_bytes());
        message.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        message.extend_from_slice(rdata);
    }

    let rng = SystemRandom::new();
    let signature = key
        .signer
        .sign(&rng, &message)
        .map_err(|_| DnsError::Signing("ECDSA signing failed".into()))?;

    Ok(ResourceRecord {
        labels: first.labels.clone(),
        rtype: RecordType::RRSIG,
        rclass: RecordClass::IN,
        ttl: first.ttl,
        rdata: RData::Rrsig {
            type_covered: first.rtype.into(),
            algorithm: key.meta.algorithm,
            labels: label_count,
            original_ttl: first.ttl,
            expiration,
            inception,
            key_tag: key.key_tag(),
            signer: apex.to_vec(),
            // Raw r || s, each 32 bytes zero-left-padded (FIXED encoding).
            signature: signature.as_ref().to_vec(),
        },
    })
}

/// Group a section into RRsets by (owner, type), preserving first-seen
/// order. Existing signatures and meta types are never re-signed.
fn rrsets(section: &[ResourceRecord]) -> Vec<Vec<&ResourceRecord>> {
    let mut groups: Vec<(String, RecordType, Vec<&ResourceRecord>)> = Vec::new();
    for rr in section {
        if rr.rtype == RecordType::RRSIG || rr.rtype.is_meta() {
            continue;
        }
        let owner = rr.name();
        match groups
            .iter_mut()
            .find(|(name, rtype, _)| *name == owner && *rtype == rr.rtype)
        {
            Some((_, _, group)) => group.push(rr),
            None => groups.push((owner, rr.rtype, vec![rr])),
        }
    }
    groups.into_iter().map(|(_, _, group)| group).collect()
}

/// Sign every RRset in a section with every key, appending the RRSIGs.
pub fn sign_section(
    section: &mut Vec<ResourceRecord>,
    apex: &[String],
    keys: &[ActiveKey],
    validity: ChronoDuration,
) -> Result<()> {
    let now = Utc::now();
    let mut signatures = Vec::new();
    for group in rrsets(section) {
        for key in keys {
            signatures.push(sign_rrset(&group, apex, key, now, validity)?);
        }
    }
    section.extend(signatures);
    Ok(())
}
