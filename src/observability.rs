// Centralized Observability Infrastructure for ShopMetrics
// Structured logging, metrics, and tracing for the fetch and aggregation
// pipeline.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

// Global atomic counters for metrics
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);
static FETCH_COUNTER: AtomicU64 = AtomicU64::new(0);
static CACHE_HIT_COUNTER: AtomicU64 = AtomicU64::new(0);
static CACHE_MISS_COUNTER: AtomicU64 = AtomicU64::new(0);
static CANCELLATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the logging and tracing infrastructure
/// This should be called once at application startup
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    // Determine the filter level based on flags
    let filter_level = if quiet {
        // In quiet mode, suppress everything except errors
        EnvFilter::new("error")
    } else if verbose {
        // In verbose mode, show debug info for shopmetrics and info for others
        EnvFilter::new("shopmetrics=debug,info")
    } else {
        // Default: warnings and errors for shopmetrics, only errors for
        // dependencies. RUST_LOG or --verbose opens this up.
        EnvFilter::new("shopmetrics=warn,error")
    };

    // Quiet flag takes precedence over the environment variable, so --quiet
    // always suppresses logs regardless of RUST_LOG
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    // In quiet mode, minimal output without metadata
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_thread_ids(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => {
            if !quiet {
                info!("ShopMetrics observability initialized");
            }
            Ok(())
        }
        Err(_) => {
            // Already initialized, which is fine in test environments
            Ok(())
        }
    }
}

/// Represents different types of operations for structured logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    // Cache operations
    CacheHit {
        key: String,
        order_count: usize,
    },
    CacheMiss {
        key: String,
    },
    CacheExpired {
        key: String,
        age_secs: u64,
    },
    CacheInvalidate {
        key: String,
    },

    // Provider operations
    ProviderFetch {
        key: String,
        order_count: usize,
    },
    ProviderRetry {
        key: String,
        attempt: u32,
    },
    FetchCancelled {
        key: String,
    },
    DedupJoin {
        key: String,
    },

    // Aggregation operations
    Aggregate {
        row_count: usize,
        group_count: usize,
    },
    Timeline {
        bucket_count: usize,
    },

    // System operations
    Startup {
        version: String,
    },
    Shutdown {
        reason: String,
    },
}

impl Operation {
    /// Validate the operation parameters
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::ProviderRetry { attempt, .. } => {
                if *attempt == 0 {
                    anyhow::bail!("Retry attempts are counted from 1");
                }
            }
            Operation::CacheHit { key, .. }
            | Operation::CacheMiss { key }
            | Operation::CacheExpired { key, .. }
            | Operation::CacheInvalidate { key }
            | Operation::ProviderFetch { key, .. }
            | Operation::FetchCancelled { key }
            | Operation::DedupJoin { key } => {
                if key.is_empty() {
                    anyhow::bail!("Cache operation with empty key");
                }
            }
            _ => {
                // Other operations don't need validation
            }
        }
        Ok(())
    }
}

/// Metric types for performance monitoring
#[derive(Debug, Clone)]
pub enum MetricType {
    Counter {
        name: &'static str,
        value: u64,
    },
    Gauge {
        name: &'static str,
        value: f64,
    },
    Histogram {
        name: &'static str,
        value: f64,
        unit: &'static str,
    },
    Timer {
        name: &'static str,
        duration: Duration,
    },
}

/// Operation context for tracing through the system
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub operation: String,
    pub start_time: Instant,
    pub attributes: Vec<(String, String)>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
            operation: operation.into(),
            start_time: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Log an operation with full context
#[instrument(skip(ctx))]
pub fn log_operation(ctx: &OperationContext, op: &Operation, result: &Result<()>) {
    let elapsed = ctx.elapsed();
    let attrs = ctx
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Ok(()) => {
            info!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                parent_span_id = ?ctx.parent_span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                "Operation completed: {:?}", op
            );
            OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            error!(
                trace_id = %ctx.trace_id,
                span_id = %ctx.span_id,
                parent_span_id = ?ctx.parent_span_id,
                operation = %ctx.operation,
                elapsed_ms = elapsed.as_millis(),
                attributes = %attrs,
                error = %e,
                "Operation failed: {:?}", op
            );
            ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Update specific counters
    match op {
        Operation::ProviderFetch { .. } => {
            FETCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Operation::CacheHit { .. } => {
            CACHE_HIT_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Operation::CacheMiss { .. } | Operation::CacheExpired { .. } => {
            CACHE_MISS_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        Operation::FetchCancelled { .. } => {
            CANCELLATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}

/// Record a metric
pub fn record_metric(metric: MetricType) {
    match metric {
        MetricType::Counter { name, value } => {
            debug!("metric.counter {} = {}", name, value);
        }
        MetricType::Gauge { name, value } => {
            debug!("metric.gauge {} = {}", name, value);
        }
        MetricType::Histogram { name, value, unit } => {
            debug!("metric.histogram {} = {} {}", name, value, unit);
        }
        MetricType::Timer { name, duration } => {
            debug!("metric.timer {} = {:?}", name, duration);
        }
    }
}

/// Execute a closure with a trace context
pub async fn with_trace_id<F, T>(operation: &str, f: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let ctx = OperationContext::new(operation);
    let trace_id = ctx.trace_id;
    let span_id = ctx.span_id;

    info!(
        trace_id = %trace_id,
        span_id = %span_id,
        "Starting operation: {}", operation
    );

    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %trace_id,
                span_id = %span_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed successfully: {}", operation
            );
            record_metric(MetricType::Timer {
                name: "operation.duration",
                duration: elapsed,
            });
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                span_id = %span_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Operation failed: {}", operation
            );
            record_metric(MetricType::Counter {
                name: "operation.errors",
                value: 1,
            });
        }
    }

    result
}

/// Get current metrics snapshot
pub fn get_metrics() -> serde_json::Value {
    serde_json::json!({
        "operations": {
            "total": OPERATION_COUNTER.load(Ordering::Relaxed),
            "errors": ERROR_COUNTER.load(Ordering::Relaxed),
            "provider_fetches": FETCH_COUNTER.load(Ordering::Relaxed),
            "cache_hits": CACHE_HIT_COUNTER.load(Ordering::Relaxed),
            "cache_misses": CACHE_MISS_COUNTER.load(Ordering::Relaxed),
            "cancellations": CANCELLATION_COUNTER.load(Ordering::Relaxed),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Structured error logging with context
#[instrument]
pub fn log_error_with_context(error: &anyhow::Error, ctx: &OperationContext) {
    let error_chain = error
        .chain()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" -> ");

    error!(
        trace_id = %ctx.trace_id,
        span_id = %ctx.span_id,
        operation = %ctx.operation,
        error_chain = %error_chain,
        "Error occurred during operation"
    );
}

/// Performance timer for measuring operation duration
pub struct PerfTimer {
    name: String,
    start: Instant,
    ctx: OperationContext,
}

impl PerfTimer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let ctx = OperationContext::new(&name);
        info!(
            trace_id = %ctx.trace_id,
            span_id = %ctx.span_id,
            "Timer started: {}", name
        );
        Self {
            name,
            start: Instant::now(),
            ctx,
        }
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        info!(
            trace_id = %self.ctx.trace_id,
            span_id = %self.ctx.span_id,
            elapsed_ms = elapsed.as_millis(),
            "Timer completed: {}", self.name
        );
        record_metric(MetricType::Timer {
            name: "perf.timer",
            duration: elapsed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_context_creation() {
        let ctx = OperationContext::new("fetch_orders");
        assert_eq!(ctx.operation, "fetch_orders");
        assert!(ctx.parent_span_id.is_none());

        let child = ctx.child("provider_page");
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_eq!(child.parent_span_id, Some(ctx.span_id));
    }

    #[test]
    fn test_operation_validation() {
        let valid = Operation::ProviderRetry {
            key: "store-all-2024-01-01-2024-01-31-last_non_direct".to_string(),
            attempt: 1,
        };
        assert!(valid.validate().is_ok());

        let zero_attempt = Operation::ProviderRetry {
            key: "store-all-2024-01-01-2024-01-31-last_non_direct".to_string(),
            attempt: 0,
        };
        assert!(zero_attempt.validate().is_err());

        let empty_key = Operation::CacheMiss {
            key: String::new(),
        };
        assert!(empty_key.validate().is_err());

        let aggregate = Operation::Aggregate {
            row_count: 0,
            group_count: 0,
        };
        assert!(aggregate.validate().is_ok());
    }

    #[test]
    fn test_metrics_recording() {
        record_metric(MetricType::Counter {
            name: "test.counter",
            value: 42,
        });
        record_metric(MetricType::Gauge {
            name: "test.gauge",
            value: std::f64::consts::PI,
        });
        record_metric(MetricType::Timer {
            name: "test.timer",
            duration: Duration::from_millis(123),
        });

        let metrics = get_metrics();
        assert!(metrics["timestamp"].is_string());
        assert!(metrics["operations"].is_object());
        assert!(metrics["operations"]["cache_hits"].as_u64().is_some());
    }

    #[test]
    fn test_cache_counters_move_on_log() {
        let before = get_metrics()["operations"]["cache_hits"]
            .as_u64()
            .unwrap_or(0);

        let ctx = OperationContext::new("cache_lookup");
        log_operation(
            &ctx,
            &Operation::CacheHit {
                key: "store-all-2024-01-01-2024-01-31-last_non_direct".to_string(),
                order_count: 12,
            },
            &Ok(()),
        );

        let after = get_metrics()["operations"]["cache_hits"]
            .as_u64()
            .unwrap_or(0);
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_with_trace_id() {
        let result = with_trace_id("test_async_op", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, anyhow::Error>(42)
        })
        .await;

        assert_eq!(result.expect("Test operation should succeed"), 42);
    }

    #[test]
    fn test_error_logging_walks_the_chain() {
        let error = anyhow::anyhow!("socket closed")
            .context("page 3 failed")
            .context("order download failed");
        let ctx = OperationContext::new("orders.fetch");
        // Must not panic while formatting a multi-cause chain.
        log_error_with_context(&error, &ctx);
    }

    #[test]
    fn test_perf_timer() {
        {
            let _timer = PerfTimer::new("test_timer");
            std::thread::sleep(Duration::from_millis(10));
            // Timer will log on drop
        }
        let metrics = get_metrics();
        assert!(metrics["operations"]["total"].as_u64().is_some());
    }

    #[test]
    fn test_logging_level_configurations() {
        let configs = vec![
            ("quiet", "error"),
            ("verbose", "shopmetrics=debug,info"),
            ("default", "shopmetrics=warn,error"),
        ];

        for (mode, filter_str) in configs {
            assert!(
                EnvFilter::try_new(filter_str).is_ok(),
                "Failed to create filter for {} mode with filter: {}",
                mode,
                filter_str
            );
        }
    }
}
