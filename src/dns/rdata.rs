//! Per-type RDATA parsing and serialization.
//!
//! Unknown types are carried as opaque bytes so they survive a round trip
//! untouched. Canonical byte forms (lowercased embedded names, no
//! compression) feed DNSSEC signing and DS digests.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::WireError;
use super::enums::RecordType;
use super::name;
use crate::pool::PacketBuffer;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SoaData {
    pub mname: Vec<String>,
    pub rname: Vec<String>,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TsigData {
    pub algorithm: Vec<String>,
    pub time_signed: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
    pub other: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// NS, CNAME, PTR, MD, MF, MB, MG, MR all carry a single name.
    Name(Vec<String>),
    Mx {
        preference: u16,
        exchange: Vec<String>,
    },
    Soa(SoaData),
    Txt(Vec<String>),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Vec<String>,
    },
    Hinfo {
        cpu: String,
        os: String,
    },
    Minfo {
        rmailbx: Vec<String>,
        emailbx: Vec<String>,
    },
    Dnskey {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: Vec<u8>,
    },
    Ds {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Vec<u8>,
    },
    Rrsig {
        type_covered: u16,
        algorithm: u8,
        labels: u8,
        original_ttl: u32,
        expiration: u32,
        inception: u32,
        key_tag: u16,
        signer: Vec<String>,
        signature: Vec<u8>,
    },
    Nsec {
        next: Vec<String>,
        type_bitmap: Vec<u8>,
    },
    Nsec3 {
        hash_alg: u8,
        flags: u8,
        iterations: u16,
        salt: Vec<u8>,
        next_hash: Vec<u8>,
        type_bitmap: Vec<u8>,
    },
    Nsec3Param {
        hash_alg: u8,
        flags: u8,
        iterations: u16,
        salt: Vec<u8>,
    },
    Tsig(TsigData),
    /// Empty RDATA, as deletes in UPDATE messages carry.
    Empty,
    Unknown(Vec<u8>),
}

impl Default for RData {
    fn default() -> Self {
        RData::Empty
    }
}

fn read_character_string(buf: &mut PacketBuffer) -> Result<String, WireError> {
    let len = buf.read_u8()? as usize;
    let bytes = buf.read_bytes(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidText)
}

fn write_character_string(buf: &mut PacketBuffer, text: &str) -> Result<(), WireError> {
    if text.len() > 255 {
        return Err(WireError::InvalidText);
    }
    buf.write_u8(text.len() as u8)?;
    buf.write_bytes(text.as_bytes())
}

impl RData {
    /// Parse RDATA of the given type. The cursor must sit at the first
    /// RDATA byte; the parse consumes exactly `rdlen` octets or fails.
    pub fn parse(
        rtype: RecordType,
        rdlen: usize,
        buf: &mut PacketBuffer,
    ) -> Result<Self, WireError> {
        let start = buf.pos();
        let end = start + rdlen;
        if end > buf.len() {
            return Err(WireError::Truncated);
        }

        if rdlen == 0 && !matches!(rtype, RecordType::Unknown(_)) {
            return Ok(RData::Empty);
        }

        let rdata = match rtype {
            RecordType::A => {
                let bytes = buf.read_bytes(4)?;
                RData::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            RecordType::AAAA => {
                let bytes = buf.read_bytes(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            RecordType::NS
            | RecordType::MD
            | RecordType::MF
            | RecordType::CNAME
            | RecordType::MB
            | RecordType::MG
            | RecordType::MR
            | RecordType::PTR => RData::Name(name::read_name(buf)?),
            RecordType::MX => RData::Mx {
                preference: buf.read_u16()?,
                exchange: name::read_name(buf)?,
            },
            RecordType::SOA => RData::Soa(SoaData {
                mname: name::read_name(buf)?,
                rname: name::read_name(buf)?,
                serial: buf.read_u32()?,
                refresh: buf.read_u32()?,
                retry: buf.read_u32()?,
                expire: buf.read_u32()?,
                minimum: buf.read_u32()?,
            }),
            RecordType::TXT => {
                let mut strings = Vec::new();
                while buf.pos() < end {
                    strings.push(read_character_string(buf)?);
                }
                RData::Txt(strings)
            }
            RecordType::SRV => RData::Srv {
                priority: buf.read_u16()?,
                weight: buf.read_u16()?,
                port: buf.read_u16()?,
                target: name::read_name(buf)?,
            },
            RecordType::HINFO => RData::Hinfo {
                cpu: read_character_string(buf)?,
                os: read_character_string(buf)?,
            },
            RecordType::MINFO => RData::Minfo {
                rmailbx: name::read_name(buf)?,
                emailbx: name::read_name(buf)?,
            },
            RecordType::DNSKEY => {
                let flags = buf.read_u16()?;
                let protocol = buf.read_u8()?;
                let algorithm = buf.read_u8()?;
                let public_key = buf.read_bytes(end - buf.pos())?.to_vec();
                RData::Dnskey {
                    flags,
                    protocol,
                    algorithm,
                    public_key,
                }
            }
            RecordType::DS => {
                let key_tag = buf.read_u16()?;
                let algorithm = buf.read_u8()?;
                let digest_type = buf.read_u8()?;
                let digest = buf.read_bytes(end - buf.pos())?.to_vec();
                RData::Ds {
                    key_tag,
                    algorithm,
                    digest_type,
                    digest,
                }
            }
            RecordType::RRSIG => {
                let type_covered = buf.read_u16()?;
                let algorithm = buf.read_u8()?;
                let labels = buf.read_u8()?;
                let original_ttl = buf.read_u32()?;
                let expiration = buf.read_u32()?;
                let inception = buf.read_u32()?;
                let key_tag = buf.read_u16()?;
                let signer = name::read_name(buf)?;
                let signature = buf.read_bytes(end - buf.pos())?.to_vec();
                RData::Rrsig {
                    type_covered,
                    algorithm,
                    labels,
                    original_ttl,
                    expiration,
                    inception,
                    key_tag,
                    signer,
                    signature,
                }
            }
            RecordType::NSEC => {
                let next = name::read_name(buf)?;
                let type_bitmap = buf.read_bytes(end - buf.pos())?.to_vec();
                RData::Nsec { next, type_bitmap }
            }
            RecordType::NSEC3 => {
                let hash_alg = buf.read_u8()?;
                let flags = buf.read_u8()?;
                let iterations = buf.read_u16()?;
                let salt_len = buf.read_u8()? as usize;
                let salt = buf.read_bytes(salt_len)?.to_vec();
                let hash_len = buf.read_u8()? as usize;
                let next_hash = buf.read_bytes(hash_len)?.to_vec();
                let type_bitmap = buf.read_bytes(end - buf.pos())?.to_vec();
                RData::Nsec3 {
                    hash_alg,
                    flags,
                    iterations,
                    salt,
                    next_hash,
                    type_bitmap,
                }
            }
            RecordType::NSEC3PARAM => {
                let hash_alg = buf.read_u8()?;
                let flags = buf.read_u8()?;
                let iterations = buf.read_u16()?;
                let salt_len = buf.read_u8()? as usize;
                let salt = buf.read_bytes(salt_len)?.to_vec();
                RData::Nsec3Param {
                    hash_alg,
                    flags,
                    iterations,
                    salt,
                }
            }
            RecordType::TSIG => {
                let algorithm = name::read_name(buf)?;
                let time_high = buf.read_u16()? as u64;
                let time_low = buf.read_u32()? as u64;
                let fudge = buf.read_u16()?;
                let mac_len = buf.read_u16()? as usize;
                let mac = buf.read_bytes(mac_len)?.to_vec();
                let original_id = buf.read_u16()?;
                let error = buf.read_u16()?;
                let other_len = buf.read_u16()? as usize;
                let other = buf.read_bytes(other_len)?.to_vec();
                RData::Tsig(TsigData {
                    algorithm,
                    time_signed: (time_high << 32) | time_low,
                    fudge,
                    mac,
                    original_id,
                    error,
                    other,
                })
            }
            _ => RData::Unknown(buf.read_bytes(rdlen)?.to_vec()),
        };

        if buf.pos() != end {
            return Err(WireError::RdataLength);
        }
        Ok(rdata)
    }

    /// Write RDATA at the cursor. `compress` reflects whether embedded
    /// names of this record type may use compression pointers.
    pub fn serialize(&self, buf: &mut PacketBuffer, compress: bool) -> Result<(), WireError> {
        match self {
            RData::A(addr) => buf.write_bytes(&addr.octets()),
            RData::Aaaa(addr) => buf.write_bytes(&addr.octets()),
            RData::Name(labels) => name::write_name(buf, labels, compress),
            RData::Mx {
                preference,
                exchange,
            } => {
                buf.write_u16(*preference)?;
                name::write_name(buf, exchange, compress)
            }
            RData::Soa(soa) => {
                name::write_name(buf, &soa.mname, compress)?;
                name::write_name(buf, &soa.rname, compress)?;
                buf.write_u32(soa.serial)?;
                buf.write_u32(soa.refresh)?;
                buf.write_u32(soa.retry)?;
                buf.write_u32(soa.expire)?;
                buf.write_u32(soa.minimum)
            }
            RData::Txt(strings) => {
                for text in strings {
                    write_character_string(buf, text)?;
                }
                Ok(())
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.write_u16(*priority)?;
                buf.write_u16(*weight)?;
                buf.write_u16(*port)?;
                name::write_name(buf, target, false)
            }
            RData::Hinfo { cpu, os } => {
                write_character_string(buf, cpu)?;
                write_character_string(buf, os)
            }
            RData::Minfo { rmailbx, emailbx } => {
                name::write_name(buf, rmailbx, compress)?;
                name::write_name(buf, emailbx, compress)
            }
            RData::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                buf.write_u16(*flags)?;
                buf.write_u8(*protocol)?;
                buf.write_u8(*algorithm)?;
                buf.write_bytes(public_key)
            }
            RData::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buf.write_u16(*key_tag)?;
                buf.write_u8(*algorithm)?;
                buf.write_u8(*digest_type)?;
                buf.write_bytes(digest)
            }
            RData::Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                signature,
            } => {
                buf.write_u16(*type_covered)?;
                buf.write_u8(*algorithm)?;
                buf.write_u8(*labels)?;
                buf.write_u32(*original_ttl)?;
                buf.write_u32(*expiration)?;
                buf.write_u32(*inception)?;
                buf.write_u16(*key_tag)?;
                name::write_name(buf, signer, false)?;
                buf.write_bytes(signature)
            }
            RData::Nsec { next, type_bitmap } => {
                name::write_name(buf, next, false)?;
                buf.write_bytes(type_bitmap)
            }
            RData::Nsec3 {
                hash_alg,
                flags,
                iterations,
                salt,
                next_hash,
                type_bitmap,
            } => {
                buf.write_u8(*hash_alg)?;
                buf.write_u8(*flags)?;
                buf.write_u16(*iterations)?;
                buf.write_u8(salt.len() as u8)?;
                buf.write_bytes(salt)?;
                buf.write_u8(next_hash.len() as u8)?;
                buf.write_bytes(next_hash)?;
                buf.write_bytes(type_bitmap)
            }
            RData::Nsec3Param {
                hash_alg,
                flags,
                iterations,
                salt,
            } => {
                buf.write_u8(*hash_alg)?;
                buf.write_u8(*flags)?;
                buf.write_u16(*iterations)?;
                buf.write_u8(salt.len() as u8)?;
                buf.write_bytes(salt)
            }
            RData::Tsig(tsig) => {
                name::write_name(buf, &tsig.algorithm, false)?;
                buf.write_u16((tsig.time_signed >> 32) as u16)?;
                buf.write_u32(tsig.time_signed as u32)?;
                buf.write_u16(tsig.fudge)?;
                buf.write_u16(tsig.mac.len() as u16)?;
                buf.write_bytes(&tsig.mac)?;
                buf.write_u16(tsig.original_id)?;
                buf.write_u16(tsig.error)?;
                buf.write_u16(tsig.other.len() as u16)?;
                buf.write_bytes(&tsig.other)
            }
            RData::Empty => Ok(()),
            RData::Unknown(bytes) => buf.write_bytes(bytes),
        }
    }

    /// Canonical wire form (RFC 4034 §6.2): embedded names lowercased and
    /// never compressed. This is what RRSIGs cover.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        fn lowered(labels: &[String]) -> Vec<String> {
            labels.iter().map(|l| l.to_lowercase()).collect()
        }

        let canonical = match self {
            RData::Name(labels) => RData::Name(lowered(labels)),
            RData::Mx {
                preference,
                exchange,
            } => RData::Mx {
                preference: *preference,
                exchange: lowered(exchange),
            },
            RData::Soa(soa) => RData::Soa(SoaData {
                mname: lowered(&soa.mname),
                rname: lowered(&soa.rname),
                ..soa.clone()
            }),
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => RData::Srv {
                priority: *priority,
                weight: *weight,
                port: *port,
                target: lowered(target),
            },
            RData::Minfo { rmailbx, emailbx } => RData::Minfo {
                rmailbx: lowered(rmailbx),
                emailbx: lowered(emailbx),
            },
            RData::Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                signature,
            } => RData::Rrsig {
                type_covered: *type_covered,
                algorithm: *algorithm,
                labels: *labels,
                original_ttl: *original_ttl,
                expiration: *expiration,
                inception: *inception,
                key_tag: *key_tag,
                signer: lowered(signer),
                signature: signature.clone(),
            },
            RData::Nsec { next, type_bitmap } => RData::Nsec {
                next: lowered(next),
                type_bitmap: type_bitmap.clone(),
            },
            other => other.clone(),
        };

        let mut buf = PacketBuffer::new();
        canonical
            .serialize(&mut buf, false)
            .expect("canonical rdata fits a packet buffer");
        buf.as_slice().to_vec()
    }

    /// Presentation form used as repository record content.
    pub fn presentation(&self) -> String {
        match self {
            RData::A(addr) => addr.to_string(),
            RData::Aaaa(addr) => addr.to_string(),
            RData::Name(labels) => name::fqdn(labels),
            RData::Mx {
                preference,
                exchange,
            } => format!("{} {}", preference, name::fqdn(exchange)),
            RData::Soa(soa) => format!(
                "{} {} {} {} {} {} {}",
                name::fqdn(&soa.mname),
                name::fqdn(&soa.rname),
                soa.serial,
                soa.refresh,
                soa.retry,
                soa.expire,
                soa.minimum
            ),
            RData::Txt(strings) => strings.join(""),
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => format!("{} {} {} {}", priority, weight, port, name::fqdn(target)),
            RData::Hinfo { cpu, os } => format!("{} {}", cpu, os),
            RData::Minfo { rmailbx, emailbx } => {
                format!("{} {}", name::fqdn(rmailbx), name::fqdn(emailbx))
            }
            RData::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => format!(
                "{} {} {} {}",
                flags,
                protocol,
                algorithm,
                base64_encode(public_key)
            ),
            RData::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => format!(
                "{} {} {} {}",
                key_tag,
                algorithm,
                digest_type,
                hex::encode(digest)
            ),
            RData::Empty => String::new(),
            other => {
                let mut buf = PacketBuffer::new();
                let _ = other.serialize(&mut buf, false);
                hex::encode(buf.as_slice())
            }
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
