//! Update-engine metrics and tracing helpers
//!
//! With the `metrics` feature the updater records OpenTelemetry instruments on
//! the global meter. Exporting them (Prometheus, OTLP, ...) is the host
//! application's choice; it installs a meter provider before the first run.

#[cfg(feature = "metrics")]
pub use otel::{UpdaterMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use crate::update::{PrecheckStatus, RunStatus};
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use std::time::Duration;

    pub static METRICS: Lazy<UpdaterMetrics> = Lazy::new(UpdaterMetrics::init);

    pub struct UpdaterMetrics {
        pub prechecks_total: Counter<u64>,
        pub runs_total: Counter<u64>,
        pub run_duration: Histogram<f64>,
    }

    impl UpdaterMetrics {
        pub fn init() -> Self {
            let meter = global::meter("sysupdater");

            let prechecks_total = meter
                .u64_counter("sysupdater_prechecks_total")
                .with_description("Update entries prechecked, by outcome")
                .build();

            let runs_total = meter
                .u64_counter("sysupdater_runs_total")
                .with_description("Update entries executed, by outcome")
                .build();

            let run_duration = meter
                .f64_histogram("sysupdater_run_duration_seconds")
                .with_description("Duration of update entry execution")
                .build();

            Self {
                prechecks_total,
                runs_total,
                run_duration,
            }
        }

        pub fn record_precheck(&self, region: &str, status: PrecheckStatus) {
            self.prechecks_total.add(
                1,
                &[
                    KeyValue::new("region", region.to_string()),
                    KeyValue::new("status", status.as_str()),
                ],
            );
        }

        pub fn record_run(&self, region: &str, status: RunStatus, elapsed: Duration) {
            let attributes = [
                KeyValue::new("region", region.to_string()),
                KeyValue::new("status", status.as_str()),
            ];
            self.runs_total.add(1, &attributes);
            self.run_duration.record(elapsed.as_secs_f64(), &attributes);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    /// Span covering one whole pass (`precheck` or `run`)
    pub fn phase_span(phase: &'static str, entries: usize) -> Span {
        tracing::info_span!("sysupdater.phase", phase, entries)
    }

    /// Span covering one region inside a pass
    pub fn region_span(region: &str) -> Span {
        tracing::info_span!("sysupdater.region", region)
    }

    /// Span covering one entry inside a region
    pub fn entry_span(label: &str) -> Span {
        tracing::debug_span!("sysupdater.entry", entry = label)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use crate::update::{PrecheckStatus, RunStatus};
    use std::time::Duration;

    #[test]
    fn test_metrics_record_without_provider() {
        // The global no-op meter accepts recordings before a provider is set
        METRICS.record_precheck("core", PrecheckStatus::AlreadyUpdated);
        METRICS.record_run("core", RunStatus::Success, Duration::from_millis(5));
    }
}
