//! Prometheus metrics for the dispatcher

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Dispatcher metrics, registered once and shared
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub events_ingested: IntCounterVec,
    pub events_deduped: IntCounter,
    pub events_quarantined: IntCounter,
    pub sends_total: IntCounterVec,
    pub gateway_latency: Histogram,
    pub media_processed: IntCounter,
    pub realtime_frames: IntCounter,
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_ingested = IntCounterVec::new(
            Opts::new("flowchat_events_ingested_total", "Inbound events accepted"),
            &["kind"],
        )
        .expect("metric definition");
        let events_deduped = IntCounter::new(
            "flowchat_events_deduped_total",
            "Inbound events dropped by the dedup window",
        )
        .expect("metric definition");
        let events_quarantined = IntCounter::new(
            "flowchat_events_quarantined_total",
            "Malformed inbound events quarantined",
        )
        .expect("metric definition");
        let sends_total = IntCounterVec::new(
            Opts::new("flowchat_sends_total", "Gateway sends by outcome"),
            &["outcome"],
        )
        .expect("metric definition");
        let gateway_latency = Histogram::with_opts(
            HistogramOpts::new(
                "flowchat_gateway_latency_seconds",
                "Gateway call latency",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0, 120.0]),
        )
        .expect("metric definition");
        let media_processed = IntCounter::new(
            "flowchat_media_processed_total",
            "Attachments downloaded and uploaded",
        )
        .expect("metric definition");
        let realtime_frames = IntCounter::new(
            "flowchat_realtime_frames_total",
            "Frames pushed to operator connections",
        )
        .expect("metric definition");

        registry
            .register(Box::new(events_ingested.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(events_deduped.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(events_quarantined.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(sends_total.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(gateway_latency.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(media_processed.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(realtime_frames.clone()))
            .expect("metric registration");

        Self {
            registry: Arc::new(registry),
            events_ingested,
            events_deduped,
            events_quarantined,
            sends_total,
            gateway_latency,
            media_processed,
            realtime_frames,
        }
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
    fn test_metrics_register_once() {
        let metrics = Metrics::new();
        metrics.events_ingested.with_label_values(&["message.upsert"]).inc();
        metrics.events_deduped.inc();

        let families = metrics.registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "flowchat_events_ingested_total"));
    }
}
