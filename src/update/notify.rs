//! NOTIFY fan-out to secondary servers (RFC 1996).
//!
//! After a successful update the zone's NS records are enumerated, their
//! glue resolved inside the same zone, and a NOTIFY sent to each target.
//! Delivery is fire-and-forget with three retries on a fixed backoff.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_retry::Retry;
use tracing::{debug, warn};

use crate::dns::enums::{Opcode, RecordType};
use crate::dns::{Header, Packet, Question};
use crate::error::{DnsError, Result};
use crate::model::Zone;
use crate::traits::Repository;

/// Retry schedule after the initial attempt.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(120),
];
/// How long to wait for an acknowledgment per attempt.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Notifier {
    repo: Arc<dyn Repository>,
    /// Redirects the NOTIFY target port, for test isolation.
    port_override: Option<u16>,
}

impl Notifier {
    pub fn new(repo: Arc<dyn Repository>, port_override: Option<u16>) -> Self {
        Self {
            repo,
            port_override,
        }
    }

    fn notify_packet(zone: &Zone) -> Packet {
        Packet {
            header: Header {
                id: rand::random(),
                opcode: Opcode::Notify.to_u8(),
                aa: true,
                ..Header::default()
            },
            questions: vec![Question::new(&zone.name, RecordType::SOA)],
            ..Packet::default()
        }
    }

    /// Resolve the zone's secondary targets: NS names and their in-zone
    /// A glue.
    async fn targets(&self, zone: &Zone) -> Result<Vec<SocketAddr>> {
        let local = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let port = self.port_override.unwrap_or(53);
        let ns_records = self
            .repo
            .get_records(&zone.name, RecordType::NS, local)
            .await?;

        let mut targets = Vec::new();
        for ns in &ns_records {
            let ips = self.repo.get_ips(&ns.content, local).await?;
            for ip in ips {
                let addr = SocketAddr::new(IpAddr::V4(ip), port);
                if !targets.contains(&addr) {
                    targets.push(addr);
                }
            }
        }
        Ok(targets)
    }

    /// Dispatch NOTIFY messages for the zone. Spawns one background task
    /// per target; the caller does not wait for acknowledgments.
    pub async fn notify_zone(&self, zone: &Zone) -> Result<()> {
        let targets = self.targets(zone).await?;
        if targets.is_empty() {
            debug!(zone = %zone.name, "no NOTIFY targets");
            return Ok(());
        }

        let wire = Self::notify_packet(zone).to_bytes()?;
        let expected_id = u16::from_be_bytes([wire[0], wire[1]]);

        for target in targets {
            let wire = wire.clone();
            let zone_name = zone.name.clone();
            tokio::spawn(async move {
                let attempt = || async {
                    send_notify(&wire, target, expected_id).await.map_err(|e| {
                        debug!(zone = %zone_name, %target, error = %e, "NOTIFY attempt failed");
                        e
                    })
                };
                if Retry::spawn(RETRY_BACKOFF.iter().copied(), attempt)
                    .await
                    .is_err()
                {
                    warn!(zone = %zone_name, %target, "NOTIFY gave up after retries");
                }
            });
        }
        Ok(())
    }
}

async fn send_notify(wire: &[u8], target: SocketAddr, expected_id: u16) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(wire, target).await?;

    // An acknowledgment is welcome but not required by the protocol; we
    // treat silence as failure only to drive the retry schedule.
    let mut buf = [0u8; 512];
    match tokio::time::timeout(ACK_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) if from == target => {
            if len >= 2 && u16::from_be_bytes([buf[0], buf[1]]) == expected_id {
                debug!(%target, "NOTIFY acknowledged");
                Ok(())
            } else {
                Err(DnsError::Timeout)
            }
        }
        Ok(Ok(_)) | Ok(Err(_)) => Err(DnsError::Timeout),
        Err(_) => Err(DnsError::Timeout),
    }
}

/// Acknowledge an incoming NOTIFY for a zone we hold; NOTAUTH otherwise.
pub fn notify_response(request: &Packet, known_zone: bool) -> Packet {
    let mut response = request.response();
    response.header.aa = known_zone;
    if !known_zone {
        response.header.rcode = crate::dns::enums::Rcode::NotAuth.to_u8();
    }
    response
}
