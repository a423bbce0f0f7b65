use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mimir::config::{ServerConfig, ZoneManifest};
use mimir::dns::enums::RecordType;
use mimir::invalidation::MemoryInvalidator;
use mimir::model::{CidrScope, Record, Zone};
use mimir::repository::MemoryRepository;
use mimir::server::{DnsServer, Engine};

#[derive(Parser, Debug)]
#[command(name = "mimir", about = "Authoritative DNS server with DNSSEC, dynamic updates and zone transfers")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the DNS listener address.
    #[arg(long)]
    dns_addr: Option<String>,

    /// Log filter, e.g. "info" or "mimir=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

/// Seed the in-memory repository from a zone manifest (standalone mode).
fn seed_repository(repo: &MemoryRepository, manifest: &ZoneManifest) -> mimir::Result<usize> {
    let mut count = 0;
    for entry in &manifest.zones {
        let zone = Zone::new(&entry.tenant, &entry.name);
        let zone_id = zone.id;
        repo.add_zone(zone);
        for record_entry in &entry.records {
            let rtype = RecordType::from_str(&record_entry.rtype)
                .map_err(mimir::DnsError::Config)?;
            let mut record = Record::new(
                zone_id,
                &record_entry.name,
                rtype,
                &record_entry.content,
                record_entry.ttl,
            );
            record.priority = record_entry.priority;
            record.weight = record_entry.weight;
            record.port = record_entry.port;
            if let Some(scope) = &record_entry.scope {
                record.scope = Some(
                    CidrScope::from_str(scope).map_err(mimir::DnsError::Config)?,
                );
            }
            repo.add_record(record);
            count += 1;
        }
    }
    Ok(count)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log.clone())),
        )
        .init();

    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration failed");
            std::process::exit(1);
        }
    };
    if let Some(addr) = &args.dns_addr {
        match addr.parse() {
            Ok(addr) => config.dns_addr = addr,
            Err(_) => {
                error!(addr, "bad --dns-addr");
                std::process::exit(1);
            }
        }
    }

    let repo = Arc::new(MemoryRepository::new());
    if let Some(path) = &config.zones_file {
        match ZoneManifest::load(std::path::Path::new(path)) {
            Ok(manifest) => match seed_repository(&repo, &manifest) {
                Ok(count) => info!(zones = manifest.zones.len(), records = count, "zones loaded"),
                Err(e) => {
                    error!(error = %e, "zone manifest rejected");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                error!(error = %e, "cannot load zone manifest");
                std::process::exit(1);
            }
        }
    }

    let invalidator = Arc::new(MemoryInvalidator::new());
    let engine = Engine::new(config, repo, invalidator);
    let server = DnsServer::new(engine);

    info!("mimir starting");
    if let Err(e) = server.run().await {
        error!(error = %e, "server exited with failure");
        std::process::exit(1);
    }
}
