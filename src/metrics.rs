//! Prometheus metrics for the query, mutation and transfer paths.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub queries_total: IntCounterVec,
    pub responses_total: IntCounterVec,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub rate_limited: IntCounter,
    pub truncated_responses: IntCounter,
    pub updates_total: IntCounter,
    pub notifies_sent: IntCounter,
    pub transfers_total: IntCounterVec,
    pub signed_responses: IntCounter,
    pub inflight_queries: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let queries_total = IntCounterVec::new(
            Opts::new("dns_queries_total", "Queries received by protocol"),
            &["protocol"],
        )
        .expect("valid metric");
        let responses_total = IntCounterVec::new(
            Opts::new("dns_responses_total", "Responses sent by rcode"),
            &["rcode"],
        )
        .expect("valid metric");
        let cache_hits =
            IntCounter::new("dns_cache_hits_total", "L1 cache hits").expect("valid metric");
        let cache_misses =
            IntCounter::new("dns_cache_misses_total", "L1 cache misses").expect("valid metric");
        let rate_limited = IntCounter::new(
            "dns_rate_limited_total",
            "Queries dropped by the rate limiter",
        )
        .expect("valid metric");
        let truncated_responses = IntCounter::new(
            "dns_truncated_responses_total",
            "UDP responses sent with TC set",
        )
        .expect("valid metric");
        let updates_total =
            IntCounter::new("dns_updates_total", "Dynamic updates applied").expect("valid metric");
        let notifies_sent =
            IntCounter::new("dns_notifies_sent_total", "NOTIFY messages dispatched")
                .expect("valid metric");
        let transfers_total = IntCounterVec::new(
            Opts::new("dns_transfers_total", "Zone transfers served by kind"),
            &["kind"],
        )
        .expect("valid metric");
        let signed_responses = IntCounter::new(
            "dns_signed_responses_total",
            "Responses signed because DO was set",
        )
        .expect("valid metric");
        let inflight_queries =
            IntGauge::new("dns_inflight_queries", "Queries currently being processed")
                .expect("valid metric");

        for collector in [
            Box::new(queries_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(responses_total.clone()),
            Box::new(cache_hits.clone()),
            Box::new(cache_misses.clone()),
            Box::new(rate_limited.clone()),
            Box::new(truncated_responses.clone()),
            Box::new(updates_total.clone()),
            Box::new(notifies_sent.clone()),
            Box::new(transfers_total.clone()),
            Box::new(signed_responses.clone()),
            Box::new(inflight_queries.clone()),
        ] {
            registry.register(collector).expect("unique metric");
        }

        Self {
            registry,
            queries_total,
            responses_total,
            cache_hits,
            cache_misses,
            rate_limited,
            truncated_responses,
            updates_total,
            notifies_sent,
            transfers_total,
            signed_responses,
            inflight_queries,
        }
    }

    /// Text exposition for the /metrics endpoint.
    pub fn gather(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = Metrics::new();
        metrics.queries_total.with_label_values(&["udp"]).inc();
        metrics.cache_hits.inc();
        let text = metrics.gather();
        assert!(text.contains("dns_queries_total"));
        assert!(text.contains("dns_cache_hits_total 1"));
    }
}
