//! Metrics for the intake service.
//!
//! Recording goes through the `metrics` facade, so every call is a no-op until
//! [`init`] installs the Prometheus exporter.

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Every metric the service emits, so names are never spelled out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    EnvelopesAccepted,
    EnvelopesRejected,
    EnvelopesDropped,
    StoreWriteErrors,
    StoreWriteDuration,
    ConfigResponses,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::EnvelopesAccepted => "intake_envelopes_accepted_total",
            MetricName::EnvelopesRejected => "intake_envelopes_rejected_total",
            MetricName::EnvelopesDropped => "intake_envelopes_dropped_total",
            MetricName::StoreWriteErrors => "intake_store_write_errors_total",
            MetricName::StoreWriteDuration => "intake_store_write_duration_seconds",
            MetricName::ConfigResponses => "intake_config_responses_total",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricName::EnvelopesAccepted => "Envelopes acknowledged with 201",
            MetricName::EnvelopesRejected => "Envelopes rejected, labelled by error code",
            MetricName::EnvelopesDropped => "Accepted envelopes discarded because no store is configured",
            MetricName::StoreWriteErrors => "Failed document store writes",
            MetricName::StoreWriteDuration => "Document store write latency",
            MetricName::ConfigResponses => "Config blobs served",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            EnvelopesAccepted,
            EnvelopesRejected,
            EnvelopesDropped,
            StoreWriteErrors,
            StoreWriteDuration,
            ConfigResponses,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus exporter with an HTTP listener when a port is given.
/// Must be called from inside the tokio runtime.
pub fn init(port: Option<u16>) {
    let Some(port) = port else {
        info!("Metrics exporter disabled (METRICS_PORT unset)");
        return;
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => {
            for name in MetricName::all_metrics() {
                match name {
                    MetricName::StoreWriteDuration => {
                        ::metrics::describe_histogram!(name.as_str(), name.description())
                    }
                    _ => ::metrics::describe_counter!(name.as_str(), name.description()),
                }
            }
            info!(%addr, "Prometheus exporter listening");
        }
        Err(e) => warn!(error = %e, "Prometheus exporter install failed"),
    }
}

pub fn envelope_accepted() {
    ::metrics::counter!(MetricName::EnvelopesAccepted.as_str()).increment(1);
}

pub fn envelope_rejected(code: &'static str) {
    ::metrics::counter!(MetricName::EnvelopesRejected.as_str(), "reason" => code).increment(1);
}

pub fn envelope_dropped() {
    ::metrics::counter!(MetricName::EnvelopesDropped.as_str()).increment(1);
}

pub fn store_write_error() {
    ::metrics::counter!(MetricName::StoreWriteErrors.as_str()).increment(1);
}

pub fn store_write_duration(seconds: f64) {
    ::metrics::histogram!(MetricName::StoreWriteDuration.as_str()).record(seconds);
}

pub fn config_response_served() {
    ::metrics::counter!(MetricName::ConfigResponses.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: HashSet<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), MetricName::all_metrics().count());
        assert!(names.iter().all(|n| n.starts_with("intake_")));
    }

    #[test]
    fn recording_without_exporter_is_harmless() {
        envelope_accepted();
        envelope_rejected("rate_limited");
        store_write_duration(0.01);
    }

    #[test]
    fn exporter_renders_recorded_counters() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            envelope_accepted();
            envelope_rejected("rate_limited");
            config_response_served();
            store_write_duration(0.02);
        });

        let rendered = handle.render();
        assert!(rendered.contains("intake_envelopes_accepted_total"), "{rendered}");
        assert!(rendered.contains(r#"intake_envelopes_rejected_total{reason="rate_limited"}"#));
        assert!(rendered.contains("intake_config_responses_total"));
        assert!(rendered.contains("intake_store_write_duration_seconds"));
    }
}
