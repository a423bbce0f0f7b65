//! Zone transfers: full (AXFR, RFC 5936) and incremental (IXFR, RFC 1995).
//!
//! AXFR streams the whole zone bracketed by the current SOA. IXFR replays
//! journal deltas per serial; a client that is current gets a single SOA,
//! and a journal that no longer covers the client's serial falls back to
//! a full transfer.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dns::enums::{RecordType, Rcode};
use crate::dns::rdata::RData;
use crate::dns::{Packet, ResourceRecord};
use crate::error::{DnsError, Result};
use crate::model::{ChangeAction, Record, Zone, ZoneChange, parse_soa_content, serial_newer};
use crate::traits::Repository;

/// Soft cap on one transfer message, leaving headroom in the TCP frame.
const MESSAGE_BYTE_BUDGET: usize = 16 * 1024;

pub struct TransferEngine {
    repo: Arc<dyn Repository>,
    /// Client addresses allowed to transfer; empty means unrestricted.
    allow: Vec<String>,
}

impl TransferEngine {
    pub fn new(repo: Arc<dyn Repository>, allow: Vec<String>) -> Self {
        Self { repo, allow }
    }

    pub fn transfer_allowed(&self, client: &SocketAddr) -> bool {
        if self.allow.is_empty() {
            return true;
        }
        let ip = client.ip().to_string();
        self.allow.iter().any(|a| *a == ip || a == "*")
    }

    /// The zone's SOA record and a copy of it re-serialized with an
    /// arbitrary serial, for delta brackets.
    async fn soa(&self, zone: &Zone) -> Result<(Record, ResourceRecord, u32)> {
        let records = self.repo.list_records(zone.id).await?;
        let record = records
            .into_iter()
            .find(|r| r.rtype == RecordType::SOA)
            .ok_or_else(|| DnsError::Repository(format!("zone {} has no SOA", zone.name)))?;
        let rr = record.to_rr()?;
        let serial = match &rr.rdata {
            RData::Soa(soa) => soa.serial,
            _ => return Err(DnsError::Repository("SOA record with non-SOA rdata".into())),
        };
        Ok((record, rr, serial))
    }

    fn soa_with_serial(rr: &ResourceRecord, serial: u32) -> ResourceRecord {
        let mut copy = rr.clone();
        if let RData::Soa(ref mut soa) = copy.rdata {
            soa.serial = serial;
        }
        copy
    }

    fn estimated_size(rr: &ResourceRecord) -> usize {
        rr.name().len() + rr.rdata.presentation().len() + 16
    }

    /// Build the AXFR response stream: SOA, every other record, SOA.
    pub async fn handle_axfr(&self, query: &Packet, zone: &Zone, client: &SocketAddr) -> Result<Vec<Packet>> {
        if !self.transfer_allowed(client) {
            warn!(zone = %zone.name, %client, "zone transfer refused");
            let mut refused = query.response();
            refused.header.rcode = Rcode::Refused.to_u8();
            return Ok(vec![refused]);
        }

        let (_, soa_rr, serial) = self.soa(zone).await?;
        info!(zone = %zone.name, serial, %client, "AXFR");

        let mut packets = Vec::new();
        let mut current = query.response();
        current.header.aa = true;
        current.answers.push(soa_rr.clone());
        let mut budget = MESSAGE_BYTE_BUDGET;

        for record in self.repo.list_records(zone.id).await? {
            if record.rtype == RecordType::SOA {
                continue;
            }
            let rr = record.to_rr()?;
            let size = Self::estimated_size(&rr);
            if size > budget && !current.answers.is_empty() {
                packets.push(current);
                current = query.response();
                current.header.aa = true;
                budget = MESSAGE_BYTE_BUDGET;
            }
            budget = budget.saturating_sub(size);
            current.answers.push(rr);
        }

        current.answers.push(soa_rr);
        packets.push(current);
        debug!(zone = %zone.name, messages = packets.len(), "AXFR stream built");
        Ok(packets)
    }

    /// The serial the client last saw, from the SOA it put in Authority.
    fn client_serial(query: &Packet) -> Option<u32> {
        query.authorities.iter().find_map(|rr| match &rr.rdata {
            RData::Soa(soa) if rr.rtype == RecordType::SOA => Some(soa.serial),
            _ => None,
        })
    }

    /// Build the IXFR response. Deltas stream as
    /// `old-SOA, deletions, new-SOA, additions` per journaled serial,
    /// bracketed by the current SOA.
    pub async fn handle_ixfr(&self, query: &Packet, zone: &Zone, client: &SocketAddr) -> Result<Vec<Packet>> {
        if !self.transfer_allowed(client) {
            warn!(zone = %zone.name, %client, "zone transfer refused");
            let mut refused = query.response();
            refused.header.rcode = Rcode::Refused.to_u8();
            return Ok(vec![refused]);
        }

        let (_, soa_rr, current_serial) = self.soa(zone).await?;
        let Some(client_serial) = Self::client_serial(query) else {
            // No serial offered; treat as a full transfer request.
            return self.axfr_styled_as_ixfr(query, zone, client).await;
        };

        // Client equal or ahead: answer with just the current SOA.
        if !serial_newer(current_serial, client_serial) {
            debug!(zone = %zone.name, client_serial, "IXFR client is current");
            let mut response = query.response();
            response.header.aa = true;
            response.answers.push(soa_rr);
            return Ok(vec![response]);
        }

        let changes = self.repo.list_zone_changes(zone.id, client_serial).await?;
        let covered = changes
            .first()
            .map(|first| !serial_newer(first.serial, client_serial.wrapping_add(1)))
            .unwrap_or(false);
        if !covered {
            info!(zone = %zone.name, client_serial, "journal does not cover IXFR range, falling back to AXFR");
            return self.axfr_styled_as_ixfr(query, zone, client).await;
        }

        info!(zone = %zone.name, client_serial, current_serial, deltas = changes.len(), "IXFR");

        let mut response = query.response();
        response.header.aa = true;
        response.answers.push(soa_rr.clone());

        let mut prev_serial = client_serial;
        let mut idx = 0;
        while idx < changes.len() {
            let serial = changes[idx].serial;
            let group: Vec<&ZoneChange> =
                changes[idx..].iter().take_while(|c| c.serial == serial).collect();
            idx += group.len();

            // Deletions against the previous version...
            response.answers.push(Self::soa_with_serial(&soa_rr, prev_serial));
            for change in group.iter().filter(|c| c.action == ChangeAction::Delete) {
                response.answers.push(Self::change_rr(zone, change)?);
            }
            // ...then additions making up the new version.
            response.answers.push(Self::soa_with_serial(&soa_rr, serial));
            for change in group.iter().filter(|c| c.action == ChangeAction::Add) {
                response.answers.push(Self::change_rr(zone, change)?);
            }
            prev_serial = serial;
        }

        response.answers.push(soa_rr);
        Ok(vec![response])
    }

    /// AXFR content under an IXFR question, for uncovered ranges.
    async fn axfr_styled_as_ixfr(
        &self,
        query: &Packet,
        zone: &Zone,
        client: &SocketAddr,
    ) -> Result<Vec<Packet>> {
        let mut packets = self.handle_axfr(query, zone, client).await?;
        for packet in &mut packets {
            for question in &mut packet.questions {
                question.qtype = RecordType::IXFR;
            }
        }
        Ok(packets)
    }

    fn change_rr(zone: &Zone, change: &ZoneChange) -> Result<ResourceRecord> {
        Record::new(zone.id, &change.name, change.rtype, &change.content, change.ttl).to_rr()
    }
}
