//! In-memory reference repository.
//!
//! Backs standalone operation and the test suites. The production store is
//! an external service speaking the same `Repository` trait.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use uuid::Uuid;

use crate::dns::enums::RecordType;
use crate::error::{DnsError, Result};
use crate::model::{DnssecKey, Record, Zone, ZoneChange};
use crate::traits::Repository;

struct ZoneState {
    zone: Zone,
    records: Vec<Record>,
    changes: Vec<ZoneChange>,
    keys: Vec<DnssecKey>,
}

pub struct MemoryRepository {
    /// Keyed by apex FQDN (lowercased, trailing dot).
    zones: DashMap<String, Arc<RwLock<ZoneState>>>,
    by_id: DashMap<Uuid, String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            zones: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    pub fn add_zone(&self, zone: Zone) {
        self.by_id.insert(zone.id, zone.name.clone());
        self.zones.insert(
            zone.name.clone(),
            Arc::new(RwLock::new(ZoneState {
                zone,
                records: Vec::new(),
                changes: Vec::new(),
                keys: Vec::new(),
            })),
        );
    }

    pub fn add_record(&self, record: Record) {
        if let Some(state) = self.state_by_id(record.zone_id) {
            state.write().records.push(record);
        }
    }

    fn state_by_id(&self, zone_id: Uuid) -> Option<Arc<RwLock<ZoneState>>> {
        let name = self.by_id.get(&zone_id)?;
        self.zones.get(name.value()).map(|s| Arc::clone(s.value()))
    }

    /// The zone whose records could contain this name, by walking suffixes.
    fn state_for_name(&self, name: &str) -> Option<Arc<RwLock<ZoneState>>> {
        let name = name.trim_end_matches('.').to_lowercase();
        let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
        for skip in 0..=labels.len() {
            let mut candidate = labels[skip..].join(".");
            candidate.push('.');
            if candidate == "." && skip < labels.len() {
                continue;
            }
            if let Some(state) = self.zones.get(&candidate) {
                return Some(Arc::clone(state.value()));
            }
        }
        None
    }

    fn require_state(&self, zone_id: Uuid) -> Result<Arc<RwLock<ZoneState>>> {
        self.state_by_id(zone_id)
            .ok_or_else(|| DnsError::Repository(format!("unknown zone id {}", zone_id)))
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped records matching the client preempt global ones; scoped records
/// the client does not match are invisible.
fn select_scoped(records: Vec<Record>, client_ip: IpAddr) -> Vec<Record> {
    let visible: Vec<Record> = records
        .into_iter()
        .filter(|r| r.scope.map(|s| s.contains(client_ip)).unwrap_or(true))
        .collect();

    if visible.iter().any(|r| r.scope.is_some()) {
        visible.into_iter().filter(|r| r.scope.is_some()).collect()
    } else {
        visible
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_records(
        &self,
        name: &str,
        rtype: RecordType,
        client_ip: IpAddr,
    ) -> Result<Vec<Record>> {
        let lookup = name.trim_end_matches('.').to_lowercase();
        let Some(state) = self.state_for_name(&lookup) else {
            return Ok(Vec::new());
        };
        let state = state.read();
        let matches: Vec<Record> = state
            .records
            .iter()
            .filter(|r| r.name == lookup && (rtype == RecordType::ANY || r.rtype == rtype))
            .cloned()
            .collect();
        Ok(select_scoped(matches, client_ip))
    }

    async fn get_ips(&self, name: &str, client_ip: IpAddr) -> Result<Vec<Ipv4Addr>> {
        let records = self.get_records(name, RecordType::A, client_ip).await?;
        Ok(records
            .iter()
            .filter_map(|r| r.content.parse().ok())
            .collect())
    }

    async fn get_zone(&self, name: &str) -> Result<Option<Zone>> {
        let mut key = name.to_lowercase();
        if !key.ends_with('.') {
            key.push('.');
        }
        Ok(self.zones.get(&key).map(|s| s.value().read().zone.clone()))
    }

    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(self
            .zones
            .iter()
            .map(|entry| entry.value().read().zone.clone())
            .collect())
    }

    async fn list_records(&self, zone_id: Uuid) -> Result<Vec<Record>> {
        Ok(self.require_state(zone_id)?.read().records.clone())
    }

    async fn create_record(&self, record: Record) -> Result<()> {
        self.require_state(record.zone_id)?.write().records.push(record);
        Ok(())
    }

    async fn delete_record_specific(
        &self,
        zone_id: Uuid,
        name: &str,
        rtype: RecordType,
        content: &str,
    ) -> Result<bool> {
        let state = self.require_state(zone_id)?;
        let mut state = state.write();
        let lookup = name.trim_end_matches('.').to_lowercase();
        let before = state.records.len();
        state
            .records
            .retain(|r| !(r.name == lookup && r.rtype == rtype && r.content == content));
        Ok(state.records.len() < before)
    }

    async fn delete_records_by_name_and_type(
        &self,
        zone_id: Uuid,
        name: &str,
        rtype: RecordType,
    ) -> Result<usize> {
        let state = self.require_state(zone_id)?;
        let mut state = state.write();
        let lookup = name.trim_end_matches('.').to_lowercase();
        let before = state.records.len();
        state
            .records
            .retain(|r| !(r.name == lookup && r.rtype == rtype));
        Ok(before - state.records.len())
    }

    async fn delete_records_by_name(&self, zone_id: Uuid, name: &str) -> Result<usize> {
        let state = self.require_state(zone_id)?;
        let mut state = state.write();
        let lookup = name.trim_end_matches('.').to_lowercase();
        let before = state.records.len();
        state.records.retain(|r| r.name != lookup);
        Ok(before - state.records.len())
    }

    async fn record_zone_change(&self, change: ZoneChange) -> Result<()> {
        self.require_state(change.zone_id)?.write().changes.push(change);
        Ok(())
    }

    async fn list_zone_changes(&self, zone_id: Uuid, from_serial: u32) -> Result<Vec<ZoneChange>> {
        let state = self.require_state(zone_id)?;
        let state = state.read();
        let mut changes: Vec<ZoneChange> = state
            .changes
            .iter()
            .filter(|c| crate::model::serial_newer(c.serial, from_serial))
            .cloned()
            .collect();
        changes.sort_by_key(|c| c.serial);
        Ok(changes)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_keys(&self, zone_id: Uuid) -> Result<Vec<DnssecKey>> {
        Ok(self.require_state(zone_id)?.read().keys.clone())
    }

    async fn create_key(&self, key: DnssecKey) -> Result<()> {
        self.require_state(key.zone_id)?.write().keys.push(key);
        Ok(())
    }

    async fn update_key(&self, key: DnssecKey) -> Result<()> {
        let state = self.require_state(key.zone_id)?;
        let mut state = state.write();
        if let Some(existing) = state.keys.iter_mut().find(|k| k.id == key.id) {
            *existing = key;
        }
        Ok(())
    }
}
