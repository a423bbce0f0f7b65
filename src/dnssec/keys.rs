//! Signing key lifecycle.
//!
//! Keys persist through the repository; an in-memory snapshot of loaded
//! signers is swapped atomically so the query path always observes a
//! consistent key set. Rollover reconciliation runs in the background and
//! is idempotent.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{ALGORITHM_ECDSA_P256, DNSKEY_PROTOCOL, calculate_key_tag};
use crate::dns::enums::RecordType;
use crate::dns::rdata::RData;
use crate::dns::ResourceRecord;
use crate::error::{DnsError, Result};
use crate::model::{DnssecKey, KeyType, Zone};
use crate::traits::Repository;

#[derive(Debug, Clone)]
pub struct DnssecConfig {
    pub enabled: bool,
    pub zsk_rollover: ChronoDuration,
    pub zsk_overlap: ChronoDuration,
    pub ksk_rollover: ChronoDuration,
    pub ksk_overlap: ChronoDuration,
    /// RRSIG validity window from inception.
    pub signature_validity: ChronoDuration,
    pub reconcile_interval: Duration,
}

impl Default for DnssecConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            zsk_rollover: ChronoDuration::days(30),
            zsk_overlap: ChronoDuration::days(1),
            ksk_rollover: ChronoDuration::days(365),
            ksk_overlap: ChronoDuration::days(2),
            signature_validity: ChronoDuration::days(30),
            reconcile_interval: Duration::from_secs(3600),
        }
    }
}

/// A loaded signing key: repository metadata plus the ring signer.
#[derive(Clone)]
pub struct ActiveKey {
    pub meta: DnssecKey,
    pub signer: Arc<EcdsaKeyPair>,
}

impl ActiveKey {
    pub fn key_tag(&self) -> u16 {
        calculate_key_tag(
            self.meta.flags(),
            DNSKEY_PROTOCOL,
            self.meta.algorithm,
            &self.meta.public_key,
        )
    }

    /// The DNSKEY record advertising this key at the zone apex.
    pub fn dnskey_record(&self, apex: &str, ttl: u32) -> ResourceRecord {
        ResourceRecord::new(
            apex,
            RecordType::DNSKEY,
            ttl,
            RData::Dnskey {
                flags: self.meta.flags(),
                protocol: DNSKEY_PROTOCOL,
                algorithm: self.meta.algorithm,
                public_key: self.meta.public_key.clone(),
            },
        )
    }
}

type Snapshot = FxHashMap<Uuid, Vec<ActiveKey>>;

pub struct KeyManager {
    repo: Arc<dyn Repository>,
    config: DnssecConfig,
    rng: SystemRandom,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl KeyManager {
    pub fn new(repo: Arc<dyn Repository>, config: DnssecConfig) -> Self {
        Self {
            repo,
            config,
            rng: SystemRandom::new(),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn config(&self) -> &DnssecConfig {
        &self.config
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Generate a fresh ECDSA P-256 key for the zone.
    pub fn generate(&self, zone_id: Uuid, key_type: KeyType) -> Result<DnssecKey> {
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &self.rng)
            .map_err(|_| DnsError::Signing("key generation failed".into()))?;
        let keypair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, document.as_ref(), &self.rng)
                .map_err(|_| DnsError::Signing("generated key rejected".into()))?;

        // Uncompressed point: 0x04 || x || y. DNSKEY carries x || y only.
        let public_point = keypair.public_key().as_ref();
        let now = Utc::now();
        Ok(DnssecKey {
            id: Uuid::new_v4(),
            zone_id,
            key_type,
            algorithm: ALGORITHM_ECDSA_P256,
            private_key: document.as_ref().to_vec(),
            public_key: public_point[1..].to_vec(),
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    fn load(&self, meta: DnssecKey) -> Result<ActiveKey> {
        let signer = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &meta.private_key,
            &self.rng,
        )
        .map_err(|_| DnsError::Signing(format!("stored key {} rejected", meta.id)))?;
        Ok(ActiveKey {
            meta,
            signer: Arc::new(signer),
        })
    }

    /// One reconciliation pass over a zone's keys of one type:
    /// ensure an active key exists, start a rollover when the newest active
    /// key has aged out, retire keys past rollover + overlap.
    pub async fn reconcile_zone(&self, zone: &Zone, key_type: KeyType) -> Result<()> {
        let (rollover, overlap) = match key_type {
            KeyType::Zsk => (self.config.zsk_rollover, self.config.zsk_overlap),
            KeyType::Ksk => (self.config.ksk_rollover, self.config.ksk_overlap),
        };
        let now = Utc::now();

        let keys = self.repo.list_keys(zone.id).await?;
        let active: Vec<&DnssecKey> = keys
            .iter()
            .filter(|k| k.active && k.key_type == key_type)
            .collect();

        if active.is_empty() {
            info!(zone = %zone.name, ?key_type, "generating initial key");
            let key = self.generate(zone.id, key_type)?;
            self.repo.create_key(key).await?;
            return Ok(());
        }

        let youngest = active
            .iter()
            .map(|k| now - k.created_at)
            .min()
            .unwrap_or(ChronoDuration::zero());
        if youngest >= rollover {
            info!(zone = %zone.name, ?key_type, "starting key rollover");
            let key = self.generate(zone.id, key_type)?;
            self.repo.create_key(key).await?;
        }

        for key in active {
            if now - key.created_at >= rollover + overlap {
                info!(zone = %zone.name, key = %key.id, ?key_type, "retiring key");
                let mut retired = key.clone();
                retired.active = false;
                retired.updated_at = now;
                self.repo.update_key(retired).await?;
            }
        }

        Ok(())
    }

    /// Reconcile every zone, then swap in a fresh snapshot.
    pub async fn reconcile_all(&self) -> Result<()> {
        for zone in self.repo.list_zones().await? {
            self.reconcile_zone(&zone, KeyType::Zsk).await?;
            self.reconcile_zone(&zone, KeyType::Ksk).await?;
        }
        self.refresh().await
    }

    /// Reload active keys from the repository into the snapshot. Readers
    /// holding the previous Arc keep a consistent view.
    pub async fn refresh(&self) -> Result<()> {
        let mut next = Snapshot::default();
        for zone in self.repo.list_zones().await? {
            let mut loaded = Vec::new();
            for meta in self.repo.list_keys(zone.id).await? {
                if !meta.active {
                    continue;
                }
                match self.load(meta) {
                    Ok(key) => loaded.push(key),
                    Err(e) => error!(zone = %zone.name, error = %e, "skipping unloadable key"),
                }
            }
            next.insert(zone.id, loaded);
        }
        *self.snapshot.write() = Arc::new(next);
        Ok(())
    }

    /// Active zone-signing keys for a zone, from the current snapshot.
    pub fn active_zsks(&self, zone_id: Uuid) -> Vec<ActiveKey> {
        let snapshot = Arc::clone(&self.snapshot.read());
        snapshot
            .get(&zone_id)
            .map(|keys| {
                keys.iter()
                    .filter(|k| k.meta.key_type == KeyType::Zsk)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every active key for a zone (DNSKEY RRset content).
    pub fn active_keys(&self, zone_id: Uuid) -> Vec<ActiveKey> {
        let snapshot = Arc::clone(&self.snapshot.read());
        snapshot.get(&zone_id).cloned().unwrap_or_default()
    }

    /// Background rollover loop; runs until shutdown fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            return;
        }
        let mut tick = tokio::time::interval(self.config.reconcile_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reconcile_all().await {
                        error!(error = %e, "key reconciliation failed");
                    } else {
                        debug!("key reconciliation pass complete");
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}
