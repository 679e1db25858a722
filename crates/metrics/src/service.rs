use grapefruit_models::GrapefruitError;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

fn internal(e: prometheus::Error) -> GrapefruitError {
    GrapefruitError::InternalError { reason: e.to_string() }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, GrapefruitError> {
    let c = IntCounter::new(name, help).map_err(internal)?;
    registry.register(Box::new(c.clone())).map_err(internal)?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, GrapefruitError> {
    let g = IntGauge::new(name, help).map_err(internal)?;
    registry.register(Box::new(g.clone())).map_err(internal)?;
    Ok(g)
}

/// Process-wide counters for the crawler. Cheap to clone handles out of, safe to share.
pub struct MetricsService {
    registry: Registry,
    messages_received_total: IntCounter,
    messages_sent_total: IntCounter,
    malformed_messages_total: IntCounter,
    queries_received_total: IntCounterVec,
    searches_started_total: IntCounter,
    searches_finished_total: IntCounter,
    metadata_fetched_total: IntCounter,
    metadata_failed_total: IntCounter,
    torrents_stored_total: IntCounter,
    routing_table_nodes: IntGauge,
    searches_in_flight: IntGauge,
    fetches_in_flight: IntGauge,
}

impl MetricsService {
    pub fn new() -> Result<Self, GrapefruitError> {
        let registry = Registry::new();

        let queries_received_total = IntCounterVec::new(
            Opts::new("grapefruit_queries_received_total", "KRPC queries received, by method"),
            &["method"],
        )
        .map_err(internal)?;
        registry
            .register(Box::new(queries_received_total.clone()))
            .map_err(internal)?;

        Ok(Self {
            messages_received_total: counter(
                &registry,
                "grapefruit_messages_received_total",
                "Total number of DHT datagrams received",
            )?,
            messages_sent_total: counter(
                &registry,
                "grapefruit_messages_sent_total",
                "Total number of DHT datagrams sent",
            )?,
            malformed_messages_total: counter(
                &registry,
                "grapefruit_malformed_messages_total",
                "Datagrams dropped because they were not valid KRPC",
            )?,
            queries_received_total,
            searches_started_total: counter(
                &registry,
                "grapefruit_searches_started_total",
                "Peer searches started",
            )?,
            searches_finished_total: counter(
                &registry,
                "grapefruit_searches_finished_total",
                "Peer searches finished or expired",
            )?,
            metadata_fetched_total: counter(
                &registry,
                "grapefruit_metadata_fetched_total",
                "Torrent metadata downloads that succeeded",
            )?,
            metadata_failed_total: counter(
                &registry,
                "grapefruit_metadata_failed_total",
                "Torrent metadata downloads that failed on every peer",
            )?,
            torrents_stored_total: counter(
                &registry,
                "grapefruit_torrents_stored_total",
                "New torrents written to the store",
            )?,
            routing_table_nodes: gauge(&registry, "grapefruit_routing_table_nodes", "Nodes in the routing table")?,
            searches_in_flight: gauge(&registry, "grapefruit_searches_in_flight", "Peer searches in progress")?,
            fetches_in_flight: gauge(&registry, "grapefruit_fetches_in_flight", "Metadata downloads in progress")?,
            registry,
        })
    }

    pub fn record_message_received(&self) {
        self.messages_received_total.inc();
    }

    pub fn record_message_sent(&self) {
        self.messages_sent_total.inc();
    }

    pub fn record_malformed_message(&self) {
        self.malformed_messages_total.inc();
    }

    pub fn record_query(&self, method: &str) {
        self.queries_received_total.with_label_values(&[method]).inc();
    }

    pub fn record_search_started(&self) {
        self.searches_started_total.inc();
    }

    pub fn record_search_finished(&self) {
        self.searches_finished_total.inc();
    }

    pub fn record_metadata_fetched(&self) {
        self.metadata_fetched_total.inc();
    }

    pub fn record_metadata_failed(&self) {
        self.metadata_failed_total.inc();
    }

    pub fn record_torrent_stored(&self) {
        self.torrents_stored_total.inc();
    }

    pub fn set_routing_table_nodes(&self, n: usize) {
        self.routing_table_nodes.set(n as i64);
    }

    pub fn set_searches_in_flight(&self, n: usize) {
        self.searches_in_flight.set(n as i64);
    }

    pub fn fetch_started(&self) {
        self.fetches_in_flight.inc();
    }

    pub fn fetch_finished(&self) {
        self.fetches_in_flight.dec();
    }

    pub fn torrents_stored(&self) -> u64 {
        self.torrents_stored_total.get()
    }

    pub fn get_prometheus_metrics(&self) -> Result<String, GrapefruitError> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(internal)?;

        String::from_utf8(buffer).map_err(|e| GrapefruitError::InternalError { reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_text_output() {
        let metrics = MetricsService::new().unwrap();
        metrics.record_query("get_peers");
        metrics.record_query("get_peers");
        metrics.record_torrent_stored();
        metrics.set_routing_table_nodes(42);

        let text = metrics.get_prometheus_metrics().unwrap();
        assert!(text.contains("grapefruit_queries_received_total{method=\"get_peers\"} 2"));
        assert!(text.contains("grapefruit_torrents_stored_total 1"));
        assert!(text.contains("grapefruit_routing_table_nodes 42"));
        assert_eq!(metrics.torrents_stored(), 1);
    }

    #[test]
    fn test_independent_registries() {
        let a = MetricsService::new().unwrap();
        let b = MetricsService::new().unwrap();
        a.record_message_received();
        assert!(b.get_prometheus_metrics().unwrap().contains("grapefruit_messages_received_total 0"));
    }
}
