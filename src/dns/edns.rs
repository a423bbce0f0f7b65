//! EDNS(0) pseudo-record handling (RFC 6891).
//!
//! The OPT record reinterprets its class as the advertised UDP payload
//! size and its TTL as {extended RCODE, version, flags}. Options the
//! server does not recognize are kept verbatim and echoed back.

use super::WireError;
use super::enums::RecordType;
use crate::pool::PacketBuffer;

/// The DO ("DNSSEC OK") bit in the EDNS flags word.
const DO_FLAG: u16 = 0x8000;

/// Smallest payload size a client may advertise (RFC 6891 §6.2.3).
pub const MIN_UDP_PAYLOAD: u16 = 512;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edns {
    pub payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<EdnsOption>,
}

impl Default for Edns {
    fn default() -> Self {
        Self {
            payload_size: 1232,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }
}

impl Edns {
    pub fn with_payload(payload_size: u16) -> Self {
        Self {
            payload_size,
            ..Self::default()
        }
    }

    pub fn dnssec_ok(&self) -> bool {
        self.flags & DO_FLAG != 0
    }

    pub fn set_dnssec_ok(&mut self, on: bool) {
        if on {
            self.flags |= DO_FLAG;
        } else {
            self.flags &= !DO_FLAG;
        }
    }

    /// Advertised payload clamped to the legal range.
    pub fn effective_payload(&self) -> u16 {
        self.payload_size.max(MIN_UDP_PAYLOAD)
    }

    /// Parse from an OPT record body. The cursor must sit just past the
    /// owner name (which is always root for OPT).
    pub fn parse(buf: &mut PacketBuffer) -> Result<Self, WireError> {
        let payload_size = buf.read_u16()?;
        let ttl = buf.read_u32()?;
        let extended_rcode = (ttl >> 24) as u8;
        let version = (ttl >> 16) as u8;
        let flags = ttl as u16;

        let rdlen = buf.read_u16()? as usize;
        let end = buf.pos() + rdlen;
        let mut options = Vec::new();
        while buf.pos() < end {
            let code = buf.read_u16()?;
            let len = buf.read_u16()? as usize;
            let data = buf.read_bytes(len)?.to_vec();
            options.push(EdnsOption { code, data });
        }
        if buf.pos() != end {
            return Err(WireError::RdataLength);
        }

        Ok(Self {
            payload_size,
            extended_rcode,
            version,
            flags,
            options,
        })
    }

    /// Write the full OPT record (root owner included).
    pub fn serialize(&self, buf: &mut PacketBuffer) -> Result<(), WireError> {
        buf.write_u8(0)?; // root owner
        buf.write_u16(RecordType::OPT.into())?;
        buf.write_u16(self.payload_size)?;
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | self.flags as u32;
        buf.write_u32(ttl)?;

        let len_at = buf.pos();
        buf.write_u16(0)?;
        let start = buf.pos();
        for option in &self.options {
            buf.write_u16(option.code)?;
            buf.write_u16(option.data.len() as u16)?;
            buf.write_bytes(&option.data)?;
        }
        buf.patch_u16(len_at, (buf.pos() - start) as u16)
    }
}
