//! Domain models shared with the record repository.
//!
//! The repository owns persisted state; these are the shapes it hands back.
//! Records store presentation-form content strings and convert to wire
//! resource records on the way out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use crate::dns::enums::RecordType;
use crate::dns::rdata::{RData, SoaData};
use crate::dns::{ResourceRecord, name};
use crate::error::{DnsError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub tenant: String,
    /// FQDN with the trailing dot, lowercased.
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Zone {
    pub fn new(tenant: &str, name: &str) -> Self {
        let now = Utc::now();
        let mut fqdn = name.to_lowercase();
        if !fqdn.ends_with('.') {
            fqdn.push('.');
        }
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            name: fqdn,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apex labels, for building answers at the zone cut.
    pub fn apex_labels(&self) -> Vec<String> {
        name::labels_from(&self.name)
    }
}

/// A client-scoped view restriction: the record only answers queries from
/// sources inside the prefix. Records without a scope are global.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CidrScope {
    pub network: IpAddr,
    pub prefix_len: u8,
}

impl CidrScope {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                if self.prefix_len == 0 {
                    return true;
                }
                let mask = u32::MAX << (32 - self.prefix_len.min(32) as u32);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                if self.prefix_len == 0 {
                    return true;
                }
                let mask = u128::MAX << (128 - self.prefix_len.min(128) as u32);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for CidrScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| format!("missing prefix length in {}", s))?;
        let network: IpAddr = addr.parse().map_err(|_| format!("bad address in {}", s))?;
        let prefix_len: u8 = len.parse().map_err(|_| format!("bad prefix in {}", s))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(format!("prefix /{} too long for {}", prefix_len, addr));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl TryFrom<String> for CidrScope {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CidrScope> for String {
    fn from(scope: CidrScope) -> Self {
        format!("{}/{}", scope.network, scope.prefix_len)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    pub zone_id: Uuid,
    /// Owner name, stored lowercased without the trailing dot.
    pub name: String,
    pub rtype: RecordType,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub scope: Option<CidrScope>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(zone_id: Uuid, name: &str, rtype: RecordType, content: &str, ttl: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            zone_id,
            name: name.trim_end_matches('.').to_lowercase(),
            rtype,
            content: content.to_string(),
            ttl,
            priority: None,
            weight: None,
            port: None,
            scope: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the wire RDATA from the stored presentation content.
    pub fn rdata(&self) -> Result<RData> {
        let bad = |what: &str| DnsError::Repository(format!("{} in record {}: {}", what, self.name, self.content));

        Ok(match self.rtype {
            RecordType::A => RData::A(self.content.parse().map_err(|_| bad("bad IPv4"))?),
            RecordType::AAAA => RData::Aaaa(self.content.parse().map_err(|_| bad("bad IPv6"))?),
            RecordType::NS
            | RecordType::CNAME
            | RecordType::PTR
            | RecordType::MB
            | RecordType::MG
            | RecordType::MR
            | RecordType::MD
            | RecordType::MF => RData::Name(name::labels_from(&self.content)),
            RecordType::MX => {
                // Either "10 mail.example.com." or priority carried aside.
                let (preference, exchange) = match self.content.split_once(' ') {
                    Some((pref, rest)) if pref.chars().all(|c| c.is_ascii_digit()) => {
                        (pref.parse().map_err(|_| bad("bad MX preference"))?, rest)
                    }
                    _ => (self.priority.unwrap_or(0), self.content.as_str()),
                };
                RData::Mx {
                    preference,
                    exchange: name::labels_from(exchange),
                }
            }
            RecordType::SRV => {
                let fields: Vec<&str> = self.content.split_whitespace().collect();
                if fields.len() == 4 {
                    RData::Srv {
                        priority: fields[0].parse().map_err(|_| bad("bad SRV priority"))?,
                        weight: fields[1].parse().map_err(|_| bad("bad SRV weight"))?,
                        port: fields[2].parse().map_err(|_| bad("bad SRV port"))?,
                        target: name::labels_from(fields[3]),
                    }
                } else {
                    RData::Srv {
                        priority: self.priority.unwrap_or(0),
                        weight: self.weight.unwrap_or(0),
                        port: self.port.unwrap_or(0),
                        target: name::labels_from(&self.content),
                    }
                }
            }
            RecordType::TXT => RData::Txt(vec![self.content.clone()]),
            RecordType::HINFO => {
                let (cpu, os) = self.content.split_once(' ').unwrap_or((self.content.as_str(), ""));
                RData::Hinfo {
                    cpu: cpu.to_string(),
                    os: os.to_string(),
                }
            }
            RecordType::MINFO => {
                let (rmailbx, emailbx) = self
                    .content
                    .split_once(' ')
                    .unwrap_or((self.content.as_str(), "."));
                RData::Minfo {
                    rmailbx: name::labels_from(rmailbx),
                    emailbx: name::labels_from(emailbx),
                }
            }
            RecordType::SOA => RData::Soa(parse_soa_content(&self.content).ok_or_else(|| bad("bad SOA"))?),
            _ => {
                let bytes = hex::decode(&self.content).map_err(|_| bad("bad hex content"))?;
                RData::Unknown(bytes)
            }
        })
    }

    /// Convert to a wire resource record with the given owner name.
    pub fn to_rr(&self) -> Result<ResourceRecord> {
        Ok(ResourceRecord::new(&self.name, self.rtype, self.ttl, self.rdata()?))
    }
}

pub fn parse_soa_content(content: &str) -> Option<SoaData> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() != 7 {
        return None;
    }
    Some(SoaData {
        mname: name::labels_from(fields[0]),
        rname: name::labels_from(fields[1]),
        serial: fields[2].parse().ok()?,
        refresh: fields[3].parse().ok()?,
        retry: fields[4].parse().ok()?,
        expire: fields[5].parse().ok()?,
        minimum: fields[6].parse().ok()?,
    })
}

pub fn soa_content(soa: &SoaData) -> String {
    format!(
        "{} {} {} {} {} {} {}",
        name::fqdn(&soa.mname),
        name::fqdn(&soa.rname),
        soa.serial,
        soa.refresh,
        soa.retry,
        soa.expire,
        soa.minimum
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Add,
    Delete,
}

/// One append-only journal entry. Entries are ordered by serial ascending
/// and drive incremental zone transfers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneChange {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub serial: u32,
    pub action: ChangeAction,
    pub name: String,
    pub rtype: RecordType,
    pub content: String,
    pub ttl: u32,
    pub created_at: DateTime<Utc>,
}

impl ZoneChange {
    pub fn new(
        zone_id: Uuid,
        serial: u32,
        action: ChangeAction,
        name: &str,
        rtype: RecordType,
        content: &str,
        ttl: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            zone_id,
            serial,
            action,
            name: name.trim_end_matches('.').to_lowercase(),
            rtype,
            content: content.to_string(),
            ttl,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Ksk,
    Zsk,
}

/// DNSSEC signing key material. The private half is a PKCS#8 document,
/// the public half the 64-byte uncompressed P-256 point (x || y).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DnssecKey {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub key_type: KeyType,
    pub algorithm: u8,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DnssecKey {
    /// DNSKEY flags field: 256 for a ZSK, 257 (SEP bit) for a KSK.
    pub fn flags(&self) -> u16 {
        match self.key_type {
            KeyType::Ksk => 257,
            KeyType::Zsk => 256,
        }
    }
}

/// RFC 1982 serial arithmetic: is `a` newer than `b`?
pub fn serial_newer(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) > (1 << 31)
}
