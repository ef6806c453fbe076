/*!
Observability for the signal storage system.

- Structured logging setup through `tracing-subscriber`
- Prometheus counters for rehydration and write-back (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, Histogram, IntCounter, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry as TracingRegistry};

use crate::{Result, StorageError};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "signal_storage_core=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<StorageMetrics> = OnceLock::new();

/// Metrics collection for binder activity
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct StorageMetrics {
    pub hydrations_total: IntCounter,
    pub writes_total: IntCounter,
    pub skipped_writes_total: IntCounter,
    pub errors_total: IntCounter,
    pub payload_size_bytes: Histogram,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl StorageMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(|e| {
                StorageError::storage(format!("Failed to create {name} metric: {e}"))
            })?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| StorageError::storage(format!("Failed to register {name}: {e}")))?;
            Ok(counter)
        };

        let hydrations_total = counter(
            "signal_storage_hydrations_total",
            "Containers patched from a persisted record",
        )?;
        let writes_total = counter(
            "signal_storage_writes_total",
            "Records written to storage",
        )?;
        let skipped_writes_total = counter(
            "signal_storage_skipped_writes_total",
            "Write-backs skipped because saveIf returned false",
        )?;
        let errors_total = counter(
            "signal_storage_errors_total",
            "Failures routed to the error hook",
        )?;

        let payload_size_bytes = Histogram::with_opts(prometheus::HistogramOpts::new(
            "signal_storage_payload_size_bytes",
            "Size of serialized records in bytes",
        ))
        .map_err(|e| {
            StorageError::storage(format!("Failed to create payload_size_bytes metric: {e}"))
        })?;
        registry
            .register(Box::new(payload_size_bytes.clone()))
            .map_err(|e| {
                StorageError::storage(format!("Failed to register payload_size_bytes: {e}"))
            })?;

        Ok(Self {
            hydrations_total,
            writes_total,
            skipped_writes_total,
            errors_total,
            payload_size_bytes,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static StorageMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize signal storage metrics"))
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| StorageError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| StorageError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

pub(crate) fn record_hydration() {
    #[cfg(feature = "metrics")]
    StorageMetrics::global().hydrations_total.inc();
}

pub(crate) fn record_write(_size_bytes: usize) {
    #[cfg(feature = "metrics")]
    {
        let metrics = StorageMetrics::global();
        metrics.writes_total.inc();
        metrics.payload_size_bytes.observe(_size_bytes as f64);
    }
}

pub(crate) fn record_skipped_write() {
    #[cfg(feature = "metrics")]
    StorageMetrics::global().skipped_writes_total.inc();
}

pub(crate) fn record_error() {
    #[cfg(feature = "metrics")]
    StorageMetrics::global().errors_total.inc();
}

/// Initialize global logging
///
/// Honors `RUST_LOG` and falls back to the `fallback` directives when it is
/// unset or invalid. With `json` set, events are emitted as JSON lines,
/// otherwise in the human-readable format.
pub fn init_observability(json: bool, fallback: &str) -> Result<()> {
    #[cfg(feature = "metrics")]
    StorageMetrics::global();

    let filter = env_filter(fallback);

    let subscriber = TracingRegistry::default()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(false).with_current_span(false)))
        .with((!json).then(fmt::layer));

    set_global_default(subscriber).map_err(|e| {
        StorageError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("signal storage observability initialized");
    Ok(())
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability(false, DEFAULT_FILTER)
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
