//! RFC 2136 dynamic update processing.
//!
//! A request walks RECEIVED -> AUTHENTICATED -> PREREQ_CHECKED -> APPLIED
//! -> NOTIFIED. Mutations within one request run under a per-zone mutex;
//! each concrete mutation lands in the change journal carrying the new
//! serial, and the serial itself advances monotonically by one.

pub mod notify;
pub mod operations;

pub use notify::{Notifier, notify_response};
pub use operations::{Prerequisite, UpdateOp};

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dns::enums::{Opcode, RecordType, Rcode};
use crate::dns::{Packet, name};
use crate::error::{DnsError, Result};
use crate::model::{ChangeAction, Record, Zone, ZoneChange, parse_soa_content, soa_content};
use crate::traits::{CacheInvalidator, Repository};
use crate::tsig::TsigVerifier;

pub struct UpdateEngine {
    repo: Arc<dyn Repository>,
    invalidator: Arc<dyn CacheInvalidator>,
    tsig: Arc<TsigVerifier>,
    notifier: Arc<Notifier>,
    /// Zones that refuse unsigned updates (apex FQDNs).
    tsig_required: Vec<String>,
    zone_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UpdateEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        invalidator: Arc<dyn CacheInvalidator>,
        tsig: Arc<TsigVerifier>,
        notifier: Arc<Notifier>,
        tsig_required: Vec<String>,
    ) -> Self {
        Self {
            repo,
            invalidator,
            tsig,
            notifier,
            tsig_required: tsig_required
                .into_iter()
                .map(|z| {
                    let mut z = z.to_lowercase();
                    if !z.ends_with('.') {
                        z.push('.');
                    }
                    z
                })
                .collect(),
            zone_locks: DashMap::new(),
        }
    }

    fn zone_lock(&self, zone: &str) -> Arc<Mutex<()>> {
        self.zone_locks
            .entry(zone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one UPDATE message. `wire` is the original request bytes,
    /// needed for TSIG verification.
    pub async fn process(&self, wire: &[u8], packet: &Packet, client: IpAddr) -> Result<Packet> {
        // RECEIVED: exactly one question naming the zone.
        if packet.opcode() != Some(Opcode::Update) {
            return Err(DnsError::NotImplemented(packet.header.opcode));
        }
        if packet.questions.len() != 1 {
            return Err(DnsError::EmptyQuestion);
        }
        let zone_name = name::fqdn(&packet.questions[0].labels);
        let zone = self
            .repo
            .get_zone(&zone_name)
            .await?
            .ok_or_else(|| DnsError::Refused(format!("not authoritative for {}", zone_name)))?;

        // AUTHENTICATED: verify any TSIG; required zones refuse without it.
        let signed_by = match &packet.tsig {
            Some(_) => Some(self.tsig.verify(wire, packet)?),
            None => None,
        };
        if signed_by.is_none() && self.tsig_required.contains(&zone.name) {
            warn!(zone = %zone.name, %client, "unsigned update to TSIG-required zone");
            return Err(DnsError::NotAuth(zone.name.clone()));
        }

        let prerequisites = packet
            .answers
            .iter()
            .map(Prerequisite::from_rr)
            .collect::<Result<Vec<_>>>()?;
        let updates = packet
            .authorities
            .iter()
            .map(UpdateOp::from_rr)
            .collect::<Result<Vec<_>>>()?;

        // PREREQ_CHECKED + APPLIED run under the zone's mutex so the whole
        // request observes and mutates one consistent zone state.
        let lock = self.zone_lock(&zone.name);
        let _guard = lock.lock().await;

        let records = self.repo.list_records(zone.id).await?;
        for prerequisite in &prerequisites {
            if let Err(rcode) = prerequisite.check(&records) {
                debug!(zone = %zone.name, ?prerequisite, ?rcode, "prerequisite failed");
                return Err(DnsError::Prereq(rcode));
            }
        }

        let (serial, mutations) = self.apply(&zone, &updates).await?;

        info!(
            zone = %zone.name,
            serial,
            mutations = mutations.len(),
            signed_by = signed_by.as_deref().unwrap_or("-"),
            "update applied"
        );

        // Invalidate every touched RRset on all nodes.
        for op in &updates {
            let (touched_name, touched_type) = op.touched();
            let _ = self.invalidator.publish(touched_name, touched_type).await;
        }

        // NOTIFIED: fire-and-forget towards the zone's secondaries.
        if !mutations.is_empty() {
            let _ = self.notifier.notify_zone(&zone).await;
        }

        let mut response = packet.response();
        response.header.aa = true;
        response.header.rcode = Rcode::NoError.to_u8();
        Ok(response)
    }

    /// Apply update operations, bump the SOA serial once, and journal each
    /// concrete mutation. Returns the new serial and the journal entries.
    async fn apply(&self, zone: &Zone, updates: &[UpdateOp]) -> Result<(u32, Vec<ZoneChange>)> {
        let records = self.repo.list_records(zone.id).await?;
        let soa = records
            .iter()
            .find(|r| r.rtype == RecordType::SOA)
            .ok_or_else(|| DnsError::Repository(format!("zone {} has no SOA", zone.name)))?
            .clone();
        let mut soa_data = parse_soa_content(&soa.content)
            .ok_or_else(|| DnsError::Repository(format!("zone {} has a bad SOA", zone.name)))?;

        let serial = soa_data.serial.wrapping_add(1);
        let mut mutations: Vec<ZoneChange> = Vec::new();

        for op in updates {
            match op {
                UpdateOp::Add {
                    name,
                    rtype,
                    content,
                    ttl,
                } => {
                    // Adding an identical record is a no-op.
                    let exists = self
                        .repo
                        .list_records(zone.id)
                        .await?
                        .iter()
                        .any(|r| r.name == *name && r.rtype == *rtype && r.content == *content);
                    if exists {
                        continue;
                    }
                    self.repo
                        .create_record(Record::new(zone.id, name, *rtype, content, *ttl))
                        .await?;
                    mutations.push(ZoneChange::new(
                        zone.id,
                        serial,
                        ChangeAction::Add,
                        name,
                        *rtype,
                        content,
                        *ttl,
                    ));
                }
                UpdateOp::DeleteRrset { name, rtype } => {
                    let victims: Vec<Record> = self
                        .repo
                        .list_records(zone.id)
                        .await?
                        .into_iter()
                        .filter(|r| r.name == *name && r.rtype == *rtype)
                        .collect();
                    self.repo
                        .delete_records_by_name_and_type(zone.id, name, *rtype)
                        .await?;
                    for victim in victims {
                        mutations.push(ZoneChange::new(
                            zone.id,
                            serial,
                            ChangeAction::Delete,
                            &victim.name,
                            victim.rtype,
                            &victim.content,
                            victim.ttl,
                        ));
                    }
                }
                UpdateOp::DeleteName { name } => {
                    let victims: Vec<Record> = self
                        .repo
                        .list_records(zone.id)
                        .await?
                        .into_iter()
                        .filter(|r| r.name == *name)
                        .collect();
                    self.repo.delete_records_by_name(zone.id, name).await?;
                    for victim in victims {
                        mutations.push(ZoneChange::new(
                            zone.id,
                            serial,
                            ChangeAction::Delete,
                            &victim.name,
                            victim.rtype,
                            &victim.content,
                            victim.ttl,
                        ));
                    }
                }
                UpdateOp::DeleteRecord {
                    name,
                    rtype,
                    content,
                } => {
                    let victim: Option<Record> = self
                        .repo
                        .list_records(zone.id)
                        .await?
                        .into_iter()
                        .find(|r| r.name == *name && r.rtype == *rtype && r.content == *content);
                    // Deleting a nonexistent record is a no-op, not an error.
                    let Some(victim) = victim else { continue };
                    self.repo
                        .delete_record_specific(zone.id, name, *rtype, content)
                        .await?;
                    mutations.push(ZoneChange::new(
                        zone.id,
                        serial,
                        ChangeAction::Delete,
                        &victim.name,
                        victim.rtype,
                        &victim.content,
                        victim.ttl,
                    ));
                }
            }
        }

        // One serial bump per request, even when several RRsets moved.
        soa_data.serial = serial;
        self.repo
            .delete_record_specific(zone.id, &soa.name, RecordType::SOA, &soa.content)
            .await?;
        let mut new_soa = soa.clone();
        new_soa.content = soa_content(&soa_data);
        self.repo.create_record(new_soa).await?;

        for change in &mutations {
            self.repo.record_zone_change(change.clone()).await?;
        }

        Ok((serial, mutations))
    }
}
