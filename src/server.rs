//! Request dispatch: UDP listener pool, TCP framing, the shared query
//! pipeline, background lifecycles and graceful shutdown.
//!
//! All three transports funnel into [`Engine::handle`]. The pipeline is
//! rate-limit -> parse -> TSIG -> EDNS -> dispatch (update / notify /
//! transfer) -> cache -> resolve -> sign -> serialize -> cache store.

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::config::ServerConfig;
use crate::dns::edns::Edns;
use crate::dns::enums::{Opcode, RecordType, Rcode};
use crate::dns::{Packet, name};
use crate::dnssec::keys::DnssecConfig;
use crate::dnssec::{KeyManager, signer};
use crate::error::{DnsError, Result};
use crate::invalidation::InvalidationBridge;
use crate::metrics::Metrics;
use crate::pool::BufferPool;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::resolver::{Resolver, ResolverConfig};
use crate::traits::{CacheInvalidator, Repository};
use crate::transfer::TransferEngine;
use crate::tsig::TsigVerifier;
use crate::update::{Notifier, UpdateEngine, notify_response};

/// Bound on one UDP datagram read.
const UDP_READ_SIZE: usize = 4096;
/// Depth of the listener -> worker task channel.
const TASK_CHANNEL_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
    Doh,
}

/// Pipeline outcome, translated per transport by the listeners.
pub enum Reply {
    /// One or more messages (transfers stream several).
    Messages(Vec<Vec<u8>>),
    /// Say nothing: transport-level failure or unparseable junk.
    Drop,
    /// Over quota: dropped on UDP/TCP, 429 on DoH.
    RateLimited,
}

pub struct Engine {
    pub config: Arc<ServerConfig>,
    repo: Arc<dyn Repository>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    resolver: Resolver,
    updates: UpdateEngine,
    transfers: TransferEngine,
    keys: Arc<KeyManager>,
    tsig: Arc<TsigVerifier>,
    buffers: BufferPool,
    pub metrics: Arc<Metrics>,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl Engine {
    pub fn new(
        config: ServerConfig,
        repo: Arc<dyn Repository>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Arc<Self> {
        let config = Arc::new(config);

        let keys = Arc::new(KeyManager::new(
            repo.clone(),
            DnssecConfig {
                enabled: config.dnssec_enabled,
                zsk_rollover: chrono::Duration::days(config.zsk_rollover_days),
                zsk_overlap: chrono::Duration::days(config.zsk_overlap_days),
                ksk_rollover: chrono::Duration::days(config.ksk_rollover_days),
                ksk_overlap: chrono::Duration::days(config.ksk_overlap_days),
                ..DnssecConfig::default()
            },
        ));

        let resolver = Resolver::new(
            repo.clone(),
            keys.clone(),
            ResolverConfig {
                root_hint: config.root_hint,
                recursion_enabled: config.recursion_enabled,
            },
        );

        let tsig = Arc::new(TsigVerifier::new(config.decoded_tsig_keys()));
        let notifier = Arc::new(Notifier::new(repo.clone(), config.notify_port_override));
        let updates = UpdateEngine::new(
            repo.clone(),
            invalidator.clone(),
            tsig.clone(),
            notifier,
            config.tsig_required_zones.clone(),
        );
        let transfers = TransferEngine::new(repo.clone(), config.transfer_allow.clone());

        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            enabled: config.rate_limit_enabled,
            refill_per_sec: config.rate_limit_refill,
            burst: config.rate_limit_burst,
            ..RateLimiterConfig::default()
        }));

        Arc::new(Self {
            repo,
            cache: Arc::new(ResponseCache::new()),
            limiter,
            resolver,
            updates,
            transfers,
            keys,
            tsig,
            buffers: BufferPool::new(config.effective_workers() * 2),
            metrics: Arc::new(Metrics::new()),
            invalidator,
            config,
        })
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        Arc::clone(&self.cache)
    }

    pub fn keys(&self) -> Arc<KeyManager> {
        Arc::clone(&self.keys)
    }

    /// The shared query pipeline. `wire` is the raw message.
    pub async fn handle(&self, wire: &[u8], client: SocketAddr, transport: Transport) -> Reply {
        let proto = match transport {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Doh => "doh",
        };
        self.metrics.queries_total.with_label_values(&[proto]).inc();
        self.metrics.inflight_queries.inc();
        let reply = self.handle_inner(wire, client, transport).await;
        self.metrics.inflight_queries.dec();
        reply
    }

    async fn handle_inner(&self, wire: &[u8], client: SocketAddr, transport: Transport) -> Reply {
        if !self.limiter.allow(client.ip()) {
            self.metrics.rate_limited.inc();
            return Reply::RateLimited;
        }
        if wire.len() < 2 {
            return Reply::Drop;
        }
        let request_id = u16::from_be_bytes([wire[0], wire[1]]);

        let packet = match Packet::parse(wire) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%client, error = %e, "malformed query");
                return self.rcode_reply(request_id, Rcode::FormErr);
            }
        };

        match self.process(wire, &packet, client, transport).await {
            Ok(reply) => reply,
            Err(e) => {
                let rcode = e.rcode();
                if rcode == Rcode::ServFail {
                    error!(%client, error = %e, "query failed");
                } else if matches!(e, DnsError::NotAuth(_) | DnsError::Refused(_) | DnsError::Tsig(_)) {
                    warn!(%client, error = %e, "query rejected");
                }

                let mut response = packet.response();
                response.header.rcode = rcode.to_u8();
                // TSIG failures advertise the specific error in a TSIG RR.
                if let DnsError::Tsig(tsig_err) = &e {
                    if let Ok(bytes) = response.to_bytes() {
                        if let Some(view) = &packet.tsig {
                            let signed = self.tsig.sign(
                                bytes,
                                &view.record.name(),
                                request_id,
                                tsig_err.tsig_error_code(),
                            );
                            if let Ok(signed) = signed {
                                return self.counted(vec![signed], rcode);
                            }
                        }
                    }
                }
                match response.to_bytes() {
                    Ok(bytes) => self.counted(vec![bytes], rcode),
                    Err(_) => Reply::Drop,
                }
            }
        }
    }

    fn rcode_reply(&self, id: u16, rcode: Rcode) -> Reply {
        match Packet::error_response(id, rcode).to_bytes() {
            Ok(bytes) => self.counted(vec![bytes], rcode),
            Err(_) => Reply::Drop,
        }
    }

    fn counted(&self, messages: Vec<Vec<u8>>, rcode: Rcode) -> Reply {
        self.metrics
            .responses_total
            .with_label_values(&[&format!("{:?}", rcode)])
            .inc();
        Reply::Messages(messages)
    }

    async fn process(
        &self,
        wire: &[u8],
        packet: &Packet,
        client: SocketAddr,
        transport: Transport,
    ) -> Result<Reply> {
        // Mutating opcodes never touch the cache path.
        match packet.opcode() {
            Some(Opcode::Query) => {}
            Some(Opcode::Update) => {
                if transport == Transport::Doh {
                    return Err(DnsError::Refused("UPDATE over DoH".into()));
                }
                let response = self.updates.process(wire, packet, client.ip()).await?;
                self.metrics.updates_total.inc();
                let mut bytes = response.to_bytes()?;
                // Sign the response when the request was signed.
                if let Some(view) = &packet.tsig {
                    bytes = self
                        .tsig
                        .sign(bytes, &view.record.name(), packet.header.id, 0)
                        .map_err(DnsError::Tsig)?;
                }
                return Ok(self.counted(vec![bytes], Rcode::NoError));
            }
            Some(Opcode::Notify) => {
                let zone_name = packet
                    .questions
                    .first()
                    .map(|q| name::fqdn(&q.labels))
                    .unwrap_or_default();
                let known = self.repo.get_zone(&zone_name).await?.is_some();
                info!(zone = %zone_name, %client, known, "NOTIFY received");
                let response = notify_response(packet, known);
                return Ok(self.counted(
                    vec![response.to_bytes()?],
                    Rcode::from_u8(response.header.rcode),
                ));
            }
            None => return Err(DnsError::NotImplemented(packet.header.opcode)),
        }

        let question = packet.questions.first().ok_or(DnsError::EmptyQuestion)?;

        // TSIG-authenticated queries are verified and answered signed.
        let signed_with = match &packet.tsig {
            Some(view) => {
                self.tsig.verify(wire, packet)?;
                Some(view.record.name())
            }
            None => None,
        };

        // Zone transfers bypass cache and truncation handling.
        if question.qtype == RecordType::AXFR || question.qtype == RecordType::IXFR {
            return self.transfer(packet, question.qtype, client, transport).await;
        }

        let dnssec_ok = packet.dnssec_ok();
        let cache_key = question.cache_key();
        let cacheable = signed_with.is_none() && !dnssec_ok;

        if cacheable {
            if let Some(bytes) = self.cache.get(&cache_key, packet.header.id) {
                self.metrics.cache_hits.inc();
                return Ok(self.counted(vec![bytes], Rcode::NoError));
            }
            self.metrics.cache_misses.inc();
        }

        // Resolution (repository-backed, possibly recursive).
        let outcome = self
            .resolver
            .resolve(question, client.ip(), packet.header.rd, dnssec_ok)
            .await?;

        let mut response = packet.response();
        response.header.aa = outcome.authoritative;
        response.header.ra = outcome.recursion_available;
        response.header.rcode = outcome.rcode.to_u8();
        response.answers = outcome.answers;
        response.authorities = outcome.authorities;

        // Echo EDNS with our payload size; unknown options ride along.
        if let Some(request_edns) = &packet.edns {
            let mut edns = Edns::with_payload(self.config.max_udp_payload);
            edns.set_dnssec_ok(dnssec_ok);
            edns.options = request_edns.options.clone();
            response.edns = Some(edns);
        }

        // DO set: sign what we are authoritative for.
        if dnssec_ok && self.keys.enabled() {
            if let Some(zone) = &outcome.zone {
                let apex = zone.apex_labels();
                let zsks = self.keys.active_zsks(zone.id);
                if !zsks.is_empty() {
                    let validity = self.keys.config().signature_validity;
                    signer::sign_section(&mut response.answers, &apex, &zsks, validity)?;
                    signer::sign_section(&mut response.authorities, &apex, &zsks, validity)?;
                    self.metrics.signed_responses.inc();
                }
            }
        }

        let mut buf = self.buffers.get();
        let mut bytes = response.serialize(&mut buf)?.to_vec();

        // UDP answers that exceed the advertised payload are truncated to
        // header + question (+ OPT).
        if transport == Transport::Udp && bytes.len() > packet.max_udp_payload() as usize {
            debug!(len = bytes.len(), limit = packet.max_udp_payload(), "truncating");
            self.metrics.truncated_responses.inc();
            bytes = response.truncated().serialize(&mut buf)?.to_vec();
            return Ok(self.counted(vec![bytes], outcome.rcode));
        }

        // Populate the cache; SERVFAIL is never stored.
        if cacheable && outcome.rcode != Rcode::ServFail {
            let ttl = match outcome.rcode {
                Rcode::NxDomain => Duration::from_secs(60),
                _ => {
                    let min = response
                        .answers
                        .iter()
                        .chain(response.authorities.iter())
                        .map(|rr| rr.ttl)
                        .min()
                        .unwrap_or(0);
                    Duration::from_secs(min as u64)
                }
            };
            self.cache.set(&cache_key, bytes.clone(), ttl);
        }

        if let Some(key_name) = signed_with {
            bytes = self
                .tsig
                .sign(bytes, &key_name, packet.header.id, 0)
                .map_err(DnsError::Tsig)?;
        }

        Ok(self.counted(vec![bytes], outcome.rcode))
    }

    async fn transfer(
        &self,
        packet: &Packet,
        qtype: RecordType,
        client: SocketAddr,
        transport: Transport,
    ) -> Result<Reply> {
        let question = packet.questions.first().ok_or(DnsError::EmptyQuestion)?;
        let zone_name = name::fqdn(&question.labels);
        let zone = self
            .repo
            .get_zone(&zone_name)
            .await?
            .ok_or_else(|| DnsError::NotAuth(zone_name.clone()))?;

        // Full transfers need the TCP stream; incremental ones fall back
        // to AXFR content over UDP and let truncation advise a retry.
        if qtype == RecordType::AXFR && transport != Transport::Tcp {
            return Err(DnsError::Refused("AXFR requires TCP".into()));
        }

        let packets = if qtype == RecordType::AXFR {
            self.metrics.transfers_total.with_label_values(&["axfr"]).inc();
            self.transfers.handle_axfr(packet, &zone, &client).await?
        } else {
            self.metrics.transfers_total.with_label_values(&["ixfr"]).inc();
            self.transfers.handle_ixfr(packet, &zone, &client).await?
        };

        let mut messages = Vec::with_capacity(packets.len());
        for response in &packets {
            let mut bytes = response.to_bytes()?;
            if transport == Transport::Udp && bytes.len() > packet.max_udp_payload() as usize {
                self.metrics.truncated_responses.inc();
                bytes = response.truncated().to_bytes()?;
                messages = vec![bytes];
                return Ok(self.counted(messages, Rcode::NoError));
            }
            messages.push(bytes);
        }
        Ok(self.counted(messages, Rcode::NoError))
    }
}

/// One queued UDP datagram.
struct UdpJob {
    data: Vec<u8>,
    src: SocketAddr,
    socket: Arc<UdpSocket>,
}

fn bind_reuseport_udp(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

pub struct DnsServer {
    engine: Arc<Engine>,
    shutdown: broadcast::Sender<()>,
}

impl DnsServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { engine, shutdown }
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Bind listeners, start background lifecycles, and serve until the
    /// shutdown signal (or ctrl-c) fires.
    pub async fn run(&self) -> Result<()> {
        let config = Arc::clone(&self.engine.config);

        if self.engine.keys.enabled() {
            self.engine.keys.reconcile_all().await?;
            info!("DNSSEC keys reconciled");
        }

        let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        // Background lifecycles.
        {
            let cache = self.engine.cache();
            let rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move { cache.run_sweeper(rx).await }));
        }
        {
            let limiter = Arc::clone(&self.engine.limiter);
            let rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move { limiter.run_gc(rx).await }));
        }
        {
            let keys = self.engine.keys();
            let rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move { keys.run(rx).await }));
        }
        {
            let bridge = InvalidationBridge::new(
                self.engine.cache(),
                Arc::clone(&self.engine.invalidator),
            );
            let rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move { bridge.run(rx).await }));
        }

        // Worker pool over the shared task channel.
        let (job_tx, job_rx) = mpsc::channel::<UdpJob>(TASK_CHANNEL_DEPTH);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        for worker in 0..config.effective_workers() {
            let engine = Arc::clone(&self.engine);
            let job_rx = Arc::clone(&job_rx);
            let deadline = config.udp_deadline();
            tasks.push(tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    let reply =
                        match tokio::time::timeout(deadline, engine.handle(&job.data, job.src, Transport::Udp))
                            .await
                        {
                            Ok(reply) => reply,
                            Err(_) => {
                                debug!(worker, src = %job.src, "query deadline expired");
                                continue;
                            }
                        };
                    if let Reply::Messages(messages) = reply {
                        if let Some(first) = messages.first() {
                            if let Err(e) = job.socket.send_to(first, job.src).await {
                                debug!(src = %job.src, error = %e, "UDP send failed");
                            }
                        }
                    }
                }
            }));
        }

        // UDP listener pool on one address via SO_REUSEPORT.
        for listener_id in 0..config.effective_udp_listeners() {
            let socket = Arc::new(bind_reuseport_udp(config.dns_addr)?);
            let job_tx = job_tx.clone();
            let mut rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut buf = vec![0u8; UDP_READ_SIZE];
                loop {
                    tokio::select! {
                        result = socket.recv_from(&mut buf) => match result {
                            Ok((len, src)) => {
                                let job = UdpJob {
                                    data: buf[..len].to_vec(),
                                    src,
                                    socket: Arc::clone(&socket),
                                };
                                // Bounded channel: shed load when full.
                                if job_tx.try_send(job).is_err() {
                                    debug!(listener_id, "task channel full, dropping datagram");
                                }
                            }
                            Err(e) => {
                                error!(listener_id, error = %e, "UDP receive failed");
                            }
                        },
                        _ = rx.recv() => break,
                    }
                }
            }));
        }
        drop(job_tx);
        info!(addr = %config.dns_addr, listeners = config.effective_udp_listeners(), "UDP listening");

        // TCP listener.
        {
            let listener = TcpListener::bind(config.dns_addr).await?;
            info!(addr = %config.dns_addr, "TCP listening");
            let engine = Arc::clone(&self.engine);
            let config = Arc::clone(&config);
            let mut rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                let engine = Arc::clone(&engine);
                                let config = Arc::clone(&config);
                                tokio::spawn(async move {
                                    if let Err(e) = serve_tcp(engine, config, stream, peer).await {
                                        debug!(%peer, error = %e, "TCP session ended");
                                    }
                                });
                            }
                            Err(e) => error!(error = %e, "TCP accept failed"),
                        },
                        _ = rx.recv() => break,
                    }
                }
            }));
        }

        // DoH listener.
        if let Some(doh_addr) = config.doh_addr {
            let engine = Arc::clone(&self.engine);
            let rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::doh::serve(engine, doh_addr, rx).await {
                    error!(error = %e, "DoH server failed");
                }
            }));
        }

        // Metrics/health listener.
        if let Some(http_addr) = config.http_addr {
            let metrics = Arc::clone(&self.engine.metrics);
            let repo = Arc::clone(&self.engine.repo);
            let rx = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::doh::serve_ops(metrics, repo, http_addr, rx).await {
                    error!(error = %e, "ops server failed");
                }
            }));
        }

        // Run until ctrl-c or an external shutdown call.
        let mut rx = self.shutdown.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                let _ = self.shutdown.send(());
            }
            _ = rx.recv() => {}
        }

        if tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!("some tasks did not stop within the shutdown window");
        }
        info!("shutdown complete");
        Ok(())
    }
}

async fn serve_tcp(
    engine: Arc<Engine>,
    config: Arc<ServerConfig>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    loop {
        // Idle timeout covers the wait for the next length prefix.
        let mut len_buf = [0u8; 2];
        match tokio::time::timeout(config.tcp_idle_timeout(), stream.read_exact(&mut len_buf)).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return Ok(()), // closed or idle
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Ok(());
        }

        let mut data = vec![0u8; len];
        stream.read_exact(&mut data).await?;

        let reply = match tokio::time::timeout(
            config.tcp_deadline(),
            engine.handle(&data, peer, Transport::Tcp),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => return Ok(()), // deadline: close the stream
        };

        match reply {
            Reply::Messages(messages) => {
                for message in messages {
                    stream.write_all(&(message.len() as u16).to_be_bytes()).await?;
                    stream.write_all(&message).await?;
                }
                stream.flush().await?;
            }
            Reply::Drop | Reply::RateLimited => return Ok(()),
        }
    }
}
