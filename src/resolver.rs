//! Query resolution.
//!
//! Three phases: direct repository lookup (CIDR-scoped records preempt
//! global ones), wildcard scan with the owner rewritten to the query
//! name, and CNAME chasing bounded to depth 8. Names that miss entirely
//! fall through to minimal iterative recursion when the client set RD,
//! otherwise to NXDOMAIN/NODATA assembly with the zone SOA (and NSEC
//! when the query asked for DNSSEC).

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::dns::enums::{RecordType, Rcode};
use crate::dns::rdata::RData;
use crate::dns::{Header, Packet, Question, ResourceRecord, name};
use crate::dnssec::KeyManager;
use crate::dnssec::denial;
use crate::error::{DnsError, Result};
use crate::model::Zone;
use crate::traits::Repository;

const MAX_CNAME_DEPTH: usize = 8;
const MAX_RECURSION_HOPS: usize = 5;
const RECURSION_HOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Negative-answer TTL when the zone SOA is unavailable (RFC 2308).
const DEFAULT_NEGATIVE_TTL: u32 = 60;

#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub rcode: Rcode,
    pub authoritative: bool,
    pub recursion_available: bool,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    /// The zone the answer came from, when authoritative.
    pub zone: Option<Zone>,
}

impl ResolveOutcome {
    fn empty() -> Self {
        Self {
            rcode: Rcode::NoError,
            authoritative: false,
            recursion_available: false,
            answers: Vec::new(),
            authorities: Vec::new(),
            zone: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Starting point for iterative recursion.
    pub root_hint: SocketAddr,
    pub recursion_enabled: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            root_hint: "198.41.0.4:53".parse().expect("valid root hint"),
            recursion_enabled: true,
        }
    }
}

pub struct Resolver {
    repo: Arc<dyn Repository>,
    keys: Arc<KeyManager>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(repo: Arc<dyn Repository>, keys: Arc<KeyManager>, config: ResolverConfig) -> Self {
        Self { repo, keys, config }
    }

    /// The closest enclosing zone for a name, walking label by label.
    pub async fn find_zone(&self, qname: &str) -> Result<Option<Zone>> {
        let labels: Vec<&str> = qname
            .trim_end_matches('.')
            .split('.')
            .filter(|l| !l.is_empty())
            .collect();
        for skip in 0..labels.len() {
            let candidate = labels[skip..].join(".");
            if let Some(zone) = self.repo.get_zone(&candidate).await? {
                return Ok(Some(zone));
            }
        }
        Ok(None)
    }

    pub async fn resolve(
        &self,
        question: &Question,
        client_ip: IpAddr,
        rd: bool,
        dnssec_ok: bool,
    ) -> Result<ResolveOutcome> {
        let qname = question.name();
        let zone = self.find_zone(&qname).await?;

        let mut outcome = ResolveOutcome::empty();
        outcome.recursion_available = self.config.recursion_enabled;
        outcome.zone = zone.clone();

        // DNSKEY at a signed apex answers from the live key set.
        if question.qtype == RecordType::DNSKEY && self.keys.enabled() {
            if let Some(zone) = &zone {
                if zone.name.trim_end_matches('.') == qname {
                    let keys = self.keys.active_keys(zone.id);
                    if !keys.is_empty() {
                        outcome.authoritative = true;
                        outcome.answers = keys
                            .iter()
                            .map(|k| k.dnskey_record(&qname, 3600))
                            .collect();
                        return Ok(outcome);
                    }
                }
            }
        }

        self.resolve_inner(question, client_ip, &mut outcome, 0).await?;

        if !outcome.answers.is_empty() {
            outcome.authoritative = zone.is_some();
            return Ok(outcome);
        }

        // Still empty: recurse if asked and allowed, but never for names
        // we are authoritative for.
        if rd && self.config.recursion_enabled && zone.is_none() {
            return self.recurse(question).await;
        }

        self.negative_answer(&qname, client_ip, dnssec_ok, &mut outcome)
            .await?;
        Ok(outcome)
    }

    /// Direct, wildcard and CNAME phases. Appends into `outcome.answers`.
    async fn resolve_inner(
        &self,
        question: &Question,
        client_ip: IpAddr,
        outcome: &mut ResolveOutcome,
        depth: usize,
    ) -> Result<()> {
        let qname = question.name();

        // Phase 1: direct match. Record names are stored lowercased, so
        // the answer owner comes out in canonical case.
        let direct = self
            .repo
            .get_records(&qname, question.qtype, client_ip)
            .await?;
        if !direct.is_empty() {
            for record in &direct {
                outcome.answers.push(record.to_rr()?);
            }
            return Ok(());
        }

        // CNAME chase: a lone CNAME at the name redirects other types.
        if question.qtype != RecordType::CNAME && question.qtype != RecordType::ANY {
            let cnames = self
                .repo
                .get_records(&qname, RecordType::CNAME, client_ip)
                .await?;
            if cnames.len() == 1 {
                if depth >= MAX_CNAME_DEPTH {
                    warn!(name = %qname, "CNAME chain too deep");
                    outcome.rcode = Rcode::ServFail;
                    return Ok(());
                }
                let target = cnames[0].content.trim_end_matches('.').to_lowercase();
                outcome.answers.push(cnames[0].to_rr()?);

                // Cycle: the target is already in the answer chain.
                let seen = outcome
                    .answers
                    .iter()
                    .any(|a| a.name() == target && a.rtype == RecordType::CNAME);
                if seen {
                    trace!(name = %qname, "CNAME cycle broken");
                    return Ok(());
                }

                let next = Question {
                    labels: name::labels_from(&target),
                    qtype: question.qtype,
                    qclass: question.qclass,
                };
                return Box::pin(self.resolve_inner(&next, client_ip, outcome, depth + 1)).await;
            }
        }

        // Phase 2: wildcard scan, leftmost label replaced by `*`.
        for skip in 1..question.labels.len() {
            let mut wildcard = String::from("*.");
            wildcard.push_str(&name::display_name(&question.labels[skip..]));
            let matches = self
                .repo
                .get_records(&wildcard, question.qtype, client_ip)
                .await?;
            if !matches.is_empty() {
                debug!(%wildcard, query = %qname, "wildcard match");
                for record in &matches {
                    let mut rr = record.to_rr()?;
                    // The answer owner is the query name, not the wildcard.
                    rr.labels = name::labels_from(&qname);
                    outcome.answers.push(rr);
                }
                return Ok(());
            }
        }

        Ok(())
    }

    /// NXDOMAIN or NODATA assembly with SOA (and NSEC when DO was set).
    async fn negative_answer(
        &self,
        qname: &str,
        client_ip: IpAddr,
        dnssec_ok: bool,
        outcome: &mut ResolveOutcome,
    ) -> Result<()> {
        let Some(zone) = outcome.zone.clone() else {
            outcome.rcode = Rcode::NxDomain;
            return Ok(());
        };
        outcome.authoritative = true;

        let name_exists = !self
            .repo
            .get_records(qname, RecordType::ANY, client_ip)
            .await?
            .is_empty();
        outcome.rcode = if name_exists {
            Rcode::NoError // NODATA
        } else {
            Rcode::NxDomain
        };

        let zone_records = self.repo.list_records(zone.id).await?;
        let soa = zone_records.iter().find(|r| r.rtype == RecordType::SOA);
        let negative_ttl = soa
            .and_then(|r| match r.to_rr().ok()?.rdata {
                RData::Soa(soa) => Some(soa.minimum.min(r.ttl)),
                _ => None,
            })
            .unwrap_or(DEFAULT_NEGATIVE_TTL);

        if let Some(soa) = soa {
            outcome.authorities.push(soa.to_rr()?);
        }

        if dnssec_ok && self.keys.enabled() {
            let nsec = if name_exists {
                denial::nsec_for_nodata(&zone_records, &zone.name, qname, negative_ttl)
            } else {
                denial::nsec_for_nxdomain(&zone_records, &zone.name, qname, negative_ttl)
            };
            outcome.authorities.push(nsec);
        }

        Ok(())
    }

    /// Minimal iterative recursion: chase referrals from the root hint,
    /// bounded by hop count, per-hop timeout and a visited-server guard.
    async fn recurse(&self, question: &Question) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::empty();
        outcome.recursion_available = true;

        let mut server = self.config.root_hint;
        let mut visited: HashSet<SocketAddr> = HashSet::new();

        for hop in 0..MAX_RECURSION_HOPS {
            if !visited.insert(server) {
                debug!(%server, "recursion loop detected");
                break;
            }

            let reply = match self.query_server(question, server).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(%server, hop, error = %e, "recursion hop failed");
                    break;
                }
            };

            if !reply.answers.is_empty() || reply.header.rcode != Rcode::NoError.to_u8() {
                outcome.rcode = Rcode::from_u8(reply.header.rcode);
                outcome.answers = reply.answers;
                return Ok(outcome);
            }

            // Referral: follow the first NS with usable glue.
            let next = reply.authorities.iter().find_map(|ns| match &ns.rdata {
                RData::Name(target) => {
                    let target_name = name::display_name(target);
                    reply.additionals.iter().find_map(|glue| {
                        if glue.name() == target_name {
                            match glue.rdata {
                                RData::A(ip) => Some(SocketAddr::new(IpAddr::V4(ip), 53)),
                                RData::Aaaa(ip) => Some(SocketAddr::new(IpAddr::V6(ip), 53)),
                                _ => None,
                            }
                        } else {
                            None
                        }
                    })
                }
                _ => None,
            });

            match next {
                Some(addr) => server = addr,
                None => break,
            }
        }

        // Out of hops or referrals: hand back what we have.
        outcome.rcode = Rcode::ServFail;
        Ok(outcome)
    }

    async fn query_server(&self, question: &Question, server: SocketAddr) -> Result<Packet> {
        let mut query = Packet {
            header: Header {
                id: rand::random(),
                ..Header::default()
            },
            questions: vec![question.clone()],
            ..Packet::default()
        };
        query.header.rd = false;

        let socket = UdpSocket::bind(if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }).await?;
        socket.send_to(&query.to_bytes()?, server).await?;

        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(RECURSION_HOP_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .map_err(|_| DnsError::Timeout)??;
        let reply = Packet::parse(&buf[..len])?;
        if reply.header.id != query.header.id {
            return Err(DnsError::Refused("mismatched reply id".into()));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssec::keys::DnssecConfig;
    use crate::model::Record;
    use crate::repository::MemoryRepository;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));

    fn resolver(dnssec: bool) -> (Arc<MemoryRepository>, Resolver, Zone) {
        let repo = Arc::new(MemoryRepository::new());
        let zone = Zone::new("t", "example.com.");
        let zone_id = zone.id;
        repo.add_zone(zone.clone());
        repo.add_record(Record::new(
            zone_id,
            "example.com",
            RecordType::SOA,
            "ns1.example.com. admin.example.com. 1 3600 900 604800 86400",
            3600,
        ));
        repo.add_record(Record::new(zone_id, "www.example.com", RecordType::A, "1.2.3.4", 300));

        let keys = Arc::new(KeyManager::new(
            repo.clone(),
            DnssecConfig {
                enabled: dnssec,
                ..DnssecConfig::default()
            },
        ));
        let resolver = Resolver::new(
            repo.clone(),
            keys,
            ResolverConfig {
                recursion_enabled: false,
                ..ResolverConfig::default()
            },
        );
        (repo, resolver, zone)
    }

    #[tokio::test]
    async fn direct_match_is_authoritative() {
        let (_repo, resolver, _zone) = resolver(false);
        let question = Question::new("WWW.EXAMPLE.COM.", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.rcode, Rcode::NoError);
        assert!(outcome.authoritative);
        assert_eq!(outcome.answers.len(), 1);
        // Owner comes back in stored (lowercase) form.
        assert_eq!(outcome.answers[0].name(), "www.example.com");
    }

    #[tokio::test]
    async fn wildcard_rewrites_owner() {
        let (repo, resolver, zone) = resolver(false);
        repo.add_record(Record::new(zone.id, "*.example.com", RecordType::TXT, "wildcard", 60));

        let question = Question::new("foo.example.com", RecordType::TXT);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.answers[0].name(), "foo.example.com");
        assert_eq!(outcome.answers[0].rdata, RData::Txt(vec!["wildcard".into()]));
    }

    #[tokio::test]
    async fn explicit_record_beats_wildcard() {
        let (repo, resolver, zone) = resolver(false);
        repo.add_record(Record::new(zone.id, "*.example.com", RecordType::A, "9.9.9.9", 60));

        let question = Question::new("www.example.com", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.answers[0].rdata, RData::A("1.2.3.4".parse().unwrap()));
    }

    #[tokio::test]
    async fn cname_is_chased() {
        let (repo, resolver, zone) = resolver(false);
        repo.add_record(Record::new(zone.id, "alias.example.com", RecordType::CNAME, "www.example.com.", 300));

        let question = Question::new("alias.example.com", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.answers.len(), 2);
        assert_eq!(outcome.answers[0].rtype, RecordType::CNAME);
        assert_eq!(outcome.answers[1].rtype, RecordType::A);
        assert_eq!(outcome.answers[1].name(), "www.example.com");
    }

    #[tokio::test]
    async fn cname_cycle_terminates() {
        let (repo, resolver, zone) = resolver(false);
        repo.add_record(Record::new(zone.id, "a.example.com", RecordType::CNAME, "b.example.com.", 300));
        repo.add_record(Record::new(zone.id, "b.example.com", RecordType::CNAME, "a.example.com.", 300));

        let question = Question::new("a.example.com", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        // Terminates with the chain it managed to collect.
        assert!(!outcome.answers.is_empty());
        assert!(outcome.answers.len() <= MAX_CNAME_DEPTH + 1);
    }

    #[tokio::test]
    async fn nxdomain_carries_soa() {
        let (_repo, resolver, _zone) = resolver(false);
        let question = Question::new("missing.example.com", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.rcode, Rcode::NxDomain);
        assert!(outcome.authoritative);
        assert_eq!(outcome.authorities.len(), 1);
        assert_eq!(outcome.authorities[0].rtype, RecordType::SOA);
    }

    #[tokio::test]
    async fn nodata_is_noerror_with_soa() {
        let (_repo, resolver, _zone) = resolver(false);
        let question = Question::new("www.example.com", RecordType::AAAA);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.rcode, Rcode::NoError);
        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.authorities[0].rtype, RecordType::SOA);
    }

    #[tokio::test]
    async fn nxdomain_with_do_adds_nsec() {
        let (repo, resolver, zone) = resolver(true);
        repo.add_record(Record::new(zone.id, "a.example.com", RecordType::A, "1.1.1.1", 300));
        repo.add_record(Record::new(zone.id, "z.example.com", RecordType::A, "2.2.2.2", 300));

        let question = Question::new("b.example.com", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, true).await.unwrap();
        assert_eq!(outcome.rcode, Rcode::NxDomain);

        let nsec = outcome
            .authorities
            .iter()
            .find(|rr| rr.rtype == RecordType::NSEC)
            .expect("NSEC present");
        assert_eq!(nsec.name(), "a.example.com");
        match &nsec.rdata {
            RData::Nsec { next, .. } => assert_eq!(name::display_name(next), "z.example.com"),
            other => panic!("expected NSEC rdata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn scoped_record_preempts_global() {
        let (repo, resolver, zone) = resolver(false);
        let mut scoped = Record::new(zone.id, "www.example.com", RecordType::A, "10.0.0.1", 300);
        scoped.scope = Some("203.0.113.0/24".parse().unwrap());
        repo.add_record(scoped);

        let question = Question::new("www.example.com", RecordType::A);
        let outcome = resolver.resolve(&question, CLIENT, false, false).await.unwrap();
        assert_eq!(outcome.answers.len(), 1);
        assert_eq!(outcome.answers[0].rdata, RData::A("10.0.0.1".parse().unwrap()));
    }
}
