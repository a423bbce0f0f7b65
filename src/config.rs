//! Server configuration.
//!
//! Defaults cover a local authoritative setup; a TOML file and `MIMIR_*`
//! environment variables override them, the environment winning. TSIG
//! secrets arrive base64-encoded and are decoded at load time.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{DnsError, Result};

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    /// Generate a throwaway certificate when no paths are given.
    pub self_signed: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            self_signed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// DNS listener address (UDP and TCP).
    pub dns_addr: SocketAddr,
    /// DoH listener; absent disables the HTTP surface.
    pub doh_addr: Option<SocketAddr>,
    pub doh_path: String,
    pub doh_tls: Option<TlsSettings>,
    /// Metrics/health listener; absent disables it.
    pub http_addr: Option<SocketAddr>,

    /// EDNS payload size advertised in responses.
    pub max_udp_payload: u16,
    /// 0 means CPU count x 8.
    pub worker_count: usize,
    /// 0 means one per CPU.
    pub udp_listeners: usize,

    pub rate_limit_enabled: bool,
    pub rate_limit_refill: f64,
    pub rate_limit_burst: f64,

    /// TSIG keys: name -> base64 secret.
    pub tsig_keys: HashMap<String, String>,
    /// Zones refusing unsigned dynamic updates.
    pub tsig_required_zones: Vec<String>,

    pub dnssec_enabled: bool,
    pub zsk_rollover_days: i64,
    pub zsk_overlap_days: i64,
    pub ksk_rollover_days: i64,
    pub ksk_overlap_days: i64,

    /// Client addresses allowed to transfer zones; empty allows all.
    pub transfer_allow: Vec<String>,

    /// Redirect NOTIFY targets to this port (test isolation).
    pub notify_port_override: Option<u16>,

    pub recursion_enabled: bool,
    pub root_hint: SocketAddr,

    pub tcp_idle_timeout_secs: u64,
    pub udp_deadline_ms: u64,
    pub tcp_deadline_ms: u64,

    /// Zone manifest to seed the in-memory repository (standalone mode).
    pub zones_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dns_addr: "0.0.0.0:53".parse().expect("valid default dns addr"),
            doh_addr: None,
            doh_path: "/dns-query".to_string(),
            doh_tls: None,
            http_addr: None,
            max_udp_payload: 1232,
            worker_count: 0,
            udp_listeners: 0,
            rate_limit_enabled: true,
            rate_limit_refill: 200_000.0,
            rate_limit_burst: 100_000.0,
            tsig_keys: HashMap::new(),
            tsig_required_zones: Vec::new(),
            dnssec_enabled: false,
            zsk_rollover_days: 30,
            zsk_overlap_days: 1,
            ksk_rollover_days: 365,
            ksk_overlap_days: 2,
            transfer_allow: Vec::new(),
            notify_port_override: None,
            recursion_enabled: true,
            root_hint: "198.41.0.4:53".parse().expect("valid root hint"),
            tcp_idle_timeout_secs: 30,
            udp_deadline_ms: 2000,
            tcp_deadline_ms: 5000,
            zones_file: None,
        }
    }
}

impl ServerConfig {
    /// Load: defaults <- TOML file (if any) <- environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    DnsError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                toml::from_str(&raw)
                    .map_err(|e| DnsError::Config(format!("bad config file: {}", e)))?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("MIMIR_DNS_ADDR") {
            if let Ok(addr) = value.parse() {
                self.dns_addr = addr;
            }
        }
        if let Ok(value) = std::env::var("MIMIR_DOH_ADDR") {
            self.doh_addr = value.parse().ok();
        }
        if let Ok(value) = std::env::var("MIMIR_HTTP_ADDR") {
            self.http_addr = value.parse().ok();
        }
        if let Ok(value) = std::env::var("MIMIR_DOH_PATH") {
            self.doh_path = value;
        }
        if let Ok(value) = std::env::var("MIMIR_MAX_UDP_PAYLOAD") {
            if let Ok(size) = value.parse() {
                self.max_udp_payload = size;
            }
        }
        if let Ok(value) = std::env::var("MIMIR_WORKER_COUNT") {
            if let Ok(count) = value.parse() {
                self.worker_count = count;
            }
        }
        if let Ok(value) = std::env::var("MIMIR_UDP_LISTENERS") {
            if let Ok(count) = value.parse() {
                self.udp_listeners = count;
            }
        }
        if let Ok(value) = std::env::var("MIMIR_RATE_LIMIT_REFILL") {
            if let Ok(rate) = value.parse() {
                self.rate_limit_refill = rate;
            }
        }
        if let Ok(value) = std::env::var("MIMIR_RATE_LIMIT_BURST") {
            if let Ok(burst) = value.parse() {
                self.rate_limit_burst = burst;
            }
        }
        if let Ok(value) = std::env::var("MIMIR_DNSSEC_ENABLED") {
            self.dnssec_enabled = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("MIMIR_RECURSION_ENABLED") {
            self.recursion_enabled = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("MIMIR_ZONES_FILE") {
            self.zones_file = Some(value);
        }
    }

    fn validate(&self) -> Result<()> {
        // EDNS advertised size must stay in the clamp range.
        if self.max_udp_payload < 512 {
            return Err(DnsError::Config(format!(
                "max_udp_payload {} below the 512 floor",
                self.max_udp_payload
            )));
        }
        if self.rate_limit_refill <= 0.0 || self.rate_limit_burst <= 0.0 {
            return Err(DnsError::Config("rate limit values must be positive".into()));
        }
        for (name, secret) in &self.tsig_keys {
            if BASE64.decode(secret).is_err() {
                return Err(DnsError::Config(format!(
                    "TSIG secret for {} is not valid base64",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            cpu_count() * 8
        }
    }

    pub fn effective_udp_listeners(&self) -> usize {
        if self.udp_listeners > 0 {
            self.udp_listeners
        } else {
            cpu_count()
        }
    }

    /// TSIG keys with secrets decoded.
    pub fn decoded_tsig_keys(&self) -> HashMap<String, Vec<u8>> {
        self.tsig_keys
            .iter()
            .filter_map(|(name, secret)| Some((name.clone(), BASE64.decode(secret).ok()?)))
            .collect()
    }

    pub fn udp_deadline(&self) -> Duration {
        Duration::from_millis(self.udp_deadline_ms)
    }

    pub fn tcp_deadline(&self) -> Duration {
        Duration::from_millis(self.tcp_deadline_ms)
    }

    pub fn tcp_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_idle_timeout_secs)
    }
}

/// Zone manifest for standalone operation: zones and records seeded into
/// the in-memory repository at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneManifest {
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneEntry {
    pub name: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default)]
    pub records: Vec<RecordEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub content: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_ttl() -> u32 {
    300
}

impl ZoneManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DnsError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| DnsError::Config(format!("bad zone manifest: {}", e)))
    }
}
