//! Capability traits for the external collaborators.
//!
//! The server owns no persisted state; everything durable lives behind
//! `Repository`. Cross-node cache invalidation rides on `CacheInvalidator`.
//! Both are injected by constructor, never reached through globals.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dns::enums::RecordType;
use crate::error::Result;
use crate::model::{DnssecKey, Record, Zone, ZoneChange};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Case-insensitive lookup. `RecordType::ANY` matches every type at the
    /// name. Implementations prefer CIDR-scoped records matching the client
    /// over global ones and hide scoped records from non-matching clients.
    async fn get_records(
        &self,
        name: &str,
        rtype: RecordType,
        client_ip: IpAddr,
    ) -> Result<Vec<Record>>;

    /// A-record addresses at the name, for NOTIFY glue resolution.
    async fn get_ips(&self, name: &str, client_ip: IpAddr) -> Result<Vec<Ipv4Addr>>;

    /// Exact zone lookup by apex FQDN.
    async fn get_zone(&self, name: &str) -> Result<Option<Zone>>;

    async fn list_zones(&self) -> Result<Vec<Zone>>;

    async fn list_records(&self, zone_id: Uuid) -> Result<Vec<Record>>;

    async fn create_record(&self, record: Record) -> Result<()>;

    /// Delete the single record matching name, type and content.
    /// Returns whether anything was removed.
    async fn delete_record_specific(
        &self,
        zone_id: Uuid,
        name: &str,
        rtype: RecordType,
        content: &str,
    ) -> Result<bool>;

    /// Delete every record at the name with the given type. Returns the
    /// count removed.
    async fn delete_records_by_name_and_type(
        &self,
        zone_id: Uuid,
        name: &str,
        rtype: RecordType,
    ) -> Result<usize>;

    /// Delete every record at the name. Returns the count removed.
    async fn delete_records_by_name(&self, zone_id: Uuid, name: &str) -> Result<usize>;

    /// Append one entry to the zone's change journal.
    async fn record_zone_change(&self, change: ZoneChange) -> Result<()>;

    /// Journal entries with serial strictly greater than `from_serial`,
    /// ordered by serial ascending.
    async fn list_zone_changes(&self, zone_id: Uuid, from_serial: u32) -> Result<Vec<ZoneChange>>;

    async fn ping(&self) -> Result<()>;

    // DNSSEC key CRUD
    async fn list_keys(&self, zone_id: Uuid) -> Result<Vec<DnssecKey>>;
    async fn create_key(&self, key: DnssecKey) -> Result<()>;
    async fn update_key(&self, key: DnssecKey) -> Result<()>;
}

/// Invalidation fan-out between nodes. `publish` announces a mutated RRset;
/// `subscribe` yields announcements made by any node, this one included.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn publish(&self, name: &str, rtype: RecordType) -> Result<()>;
    async fn subscribe(&self) -> Result<mpsc::Receiver<(String, RecordType)>>;
}
