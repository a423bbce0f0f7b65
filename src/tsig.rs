//! TSIG request/response authentication (RFC 2845, hmac-sha256 family).
//!
//! Verification works on the raw message bytes: the TSIG record is
//! stripped (using the offset the parser recorded), the additional count
//! is decremented, and the canonical TSIG variables are appended before
//! the HMAC runs. MAC comparison is constant-time.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::rdata::{RData, TsigData};
use crate::dns::{Packet, ResourceRecord, name};
use crate::pool::PacketBuffer;

/// Default fudge window in seconds.
pub const DEFAULT_FUDGE: u16 = 300;

/// TSIG RCODE-style error values carried inside the TSIG record.
pub const TSIG_ERROR_BAD_SIG: u16 = 16;
pub const TSIG_ERROR_BAD_KEY: u16 = 17;
pub const TSIG_ERROR_BAD_TIME: u16 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TsigError {
    #[error("message carries no TSIG record")]
    Missing,
    #[error("unknown key {0}")]
    UnknownKey(String),
    #[error("unsupported algorithm {0}")]
    UnknownAlgorithm(String),
    #[error("time drift of {0} seconds exceeds fudge")]
    TimeDrift(i64),
    #[error("MAC mismatch")]
    BadMac,
    #[error("malformed TSIG record")]
    Malformed,
}

impl TsigError {
    /// The error value a TSIG-bearing REFUSED/NOTAUTH response advertises.
    pub fn tsig_error_code(&self) -> u16 {
        match self {
            TsigError::UnknownKey(_) | TsigError::UnknownAlgorithm(_) => TSIG_ERROR_BAD_KEY,
            TsigError::TimeDrift(_) => TSIG_ERROR_BAD_TIME,
            _ => TSIG_ERROR_BAD_SIG,
        }
    }
}

fn hmac_algorithm(labels: &[String]) -> Option<hmac::Algorithm> {
    match name::display_name(labels).as_str() {
        "hmac-sha256" => Some(hmac::HMAC_SHA256),
        "hmac-sha384" => Some(hmac::HMAC_SHA384),
        "hmac-sha512" => Some(hmac::HMAC_SHA512),
        _ => None,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Canonical TSIG variables appended to the MAC input (RFC 2845 §3.4.2).
fn tsig_variables(key_name: &[String], data: &TsigData) -> Vec<u8> {
    let mut vars = Vec::with_capacity(64);
    vars.extend_from_slice(&name::canonical_wire(key_name));
    vars.extend_from_slice(&u16::from(RecordClass::ANY).to_be_bytes());
    vars.extend_from_slice(&0u32.to_be_bytes()); // TTL
    vars.extend_from_slice(&name::canonical_wire(&data.algorithm));
    vars.extend_from_slice(&data.time_signed.to_be_bytes()[2..]); // 48 bits
    vars.extend_from_slice(&data.fudge.to_be_bytes());
    vars.extend_from_slice(&data.error.to_be_bytes());
    vars.extend_from_slice(&(data.other.len() as u16).to_be_bytes());
    vars.extend_from_slice(&data.other);
    vars
}

pub struct TsigVerifier {
    /// key name (lowercased, no trailing dot) -> shared secret bytes
    keys: HashMap<String, Vec<u8>>,
    max_drift: u16,
}

impl TsigVerifier {
    pub fn new(keys: HashMap<String, Vec<u8>>) -> Self {
        let keys = keys
            .into_iter()
            .map(|(name, secret)| (name.trim_end_matches('.').to_lowercase(), secret))
            .collect();
        Self {
            keys,
            max_drift: DEFAULT_FUDGE,
        }
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Verify the TSIG on a parsed message against its original bytes.
    /// Returns the authenticated key name.
    pub fn verify(&self, wire: &[u8], packet: &Packet) -> Result<String, TsigError> {
        let tsig = packet.tsig.as_ref().ok_or(TsigError::Missing)?;
        let data = match &tsig.record.rdata {
            RData::Tsig(data) => data,
            _ => return Err(TsigError::Malformed),
        };

        let key_name = tsig.record.name();
        let secret = self
            .keys
            .get(&key_name)
            .ok_or_else(|| TsigError::UnknownKey(key_name.clone()))?;

        let algorithm = hmac_algorithm(&data.algorithm)
            .ok_or_else(|| TsigError::UnknownAlgorithm(name::display_name(&data.algorithm)))?;

        let drift = unix_now() as i64 - data.time_signed as i64;
        let allowed = data.fudge.max(self.max_drift) as i64;
        if drift.abs() > allowed {
            warn!(key = %key_name, drift, "TSIG time drift");
            return Err(TsigError::TimeDrift(drift));
        }

        if tsig.wire_offset > wire.len() || tsig.wire_offset < 12 {
            return Err(TsigError::Malformed);
        }

        // Message as it was signed: TSIG stripped, ARCOUNT decremented.
        let mut message = wire[..tsig.wire_offset].to_vec();
        let arcount = u16::from_be_bytes([message[10], message[11]]);
        message[10..12].copy_from_slice(&arcount.saturating_sub(1).to_be_bytes());
        message.extend_from_slice(&tsig_variables(&tsig.record.labels, data));

        let key = hmac::Key::new(algorithm, secret);
        let expected = hmac::sign(&key, &message);
        ring::constant_time::verify_slices_are_equal(expected.as_ref(), &data.mac)
            .map_err(|_| TsigError::BadMac)?;

        Ok(key_name)
    }

    /// Append a TSIG record to serialized response bytes, signing with the
    /// named key. The additional count in the header is patched in place.
    pub fn sign(
        &self,
        mut wire: Vec<u8>,
        key_name: &str,
        original_id: u16,
        error: u16,
    ) -> Result<Vec<u8>, TsigError> {
        let key_name = key_name.trim_end_matches('.').to_lowercase();
        let secret = self
            .keys
            .get(&key_name)
            .ok_or_else(|| TsigError::UnknownKey(key_name.clone()))?;

        let key_labels = name::labels_from(&key_name);
        let data = TsigData {
            algorithm: name::labels_from("hmac-sha256"),
            time_signed: unix_now(),
            fudge: DEFAULT_FUDGE,
            mac: Vec::new(),
            original_id,
            error,
            other: Vec::new(),
        };

        let mut message = wire.clone();
        message.extend_from_slice(&tsig_variables(&key_labels, &data));
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        let mac = hmac::sign(&key, &message).as_ref().to_vec();

        let record = ResourceRecord {
            labels: key_labels,
            rtype: RecordType::TSIG,
            rclass: RecordClass::ANY,
            ttl: 0,
            rdata: RData::Tsig(TsigData { mac, ..data }),
        };

        let mut buf = PacketBuffer::new();
        record
            .serialize(&mut buf)
            .map_err(|_| TsigError::Malformed)?;
        wire.extend_from_slice(buf.as_slice());

        if wire.len() >= 12 {
            let arcount = u16::from_be_bytes([wire[10], wire[11]]) + 1;
            wire[10..12].copy_from_slice(&arcount.to_be_bytes());
        }
        Ok(wire)
    }
}

/// Generate a random shared secret, for provisioning tooling and tests.
pub fn generate_secret() -> Vec<u8> {
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    let _ = rng.fill(&mut secret);
    secret
}
