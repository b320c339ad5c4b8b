// Wrapper Components - provider composition library
// High-level wrappers that layer paging, retries, and tracing onto a bare
// page fetcher, so call sites always get the composed best-practice stack.

use async_trait::async_trait;
use std::cmp;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::contracts::{
    FetchError, OrderPageFetcher, OrderProvider, OrderRecord, OrderRequest,
};
use crate::observability::*;

/// Page size the order API serves. The provider joins pages of this size
/// until a short page signals exhaustion.
pub const ORDER_PAGE_SIZE: usize = 100;

/// Joins an externally-paginated order source into whole datasets.
///
/// Stops at the first short page or once the request limit is covered,
/// whichever comes first, and checks for cancellation between pages so a
/// long join stops promptly.
pub struct PagedOrderProvider<F: OrderPageFetcher> {
    fetcher: F,
    page_size: usize,
}

impl<F: OrderPageFetcher> PagedOrderProvider<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            page_size: ORDER_PAGE_SIZE,
        }
    }

    /// Override the page size. Values below 1 are pinned to 1.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl<F: OrderPageFetcher> OrderProvider for PagedOrderProvider<F> {
    async fn fetch_orders(
        &self,
        request: &OrderRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<OrderRecord>, FetchError> {
        let limit = request.limit.get();
        let mut collected: Vec<OrderRecord> = Vec::new();
        let mut offset = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let page = self
                .fetcher
                .fetch_page(request, offset, self.page_size, cancel.clone())
                .await?;
            let page_len = page.len();
            collected.extend(page);

            // A short page means the dataset is exhausted; a covered limit
            // means the rest is not wanted.
            if page_len < self.page_size || collected.len() >= limit {
                break;
            }
            offset += self.page_size;
        }

        collected.truncate(limit);
        debug!(
            "joined {} orders across {} page(s) for {}",
            collected.len(),
            offset / self.page_size + 1,
            request.cache_key()
        );
        Ok(collected)
    }
}

/// Provider wrapper that retries transient failures with backoff.
///
/// Only `Transport` errors are retried; validation failures and
/// cancellations return immediately. The backoff sleep itself is
/// cancellable.
pub struct RetryableOrderProvider<P: OrderProvider> {
    inner: P,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl<P: OrderProvider> RetryableOrderProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Configure retry parameters
    pub fn with_retry_config(
        mut self,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }
}

#[async_trait]
impl<P: OrderProvider> OrderProvider for RetryableOrderProvider<P> {
    async fn fetch_orders(
        &self,
        request: &OrderRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<OrderRecord>, FetchError> {
        let mut attempt = 0;
        let mut delay = self.base_delay;

        loop {
            attempt += 1;

            match self.inner.fetch_orders(request, cancel.clone()).await {
                Ok(orders) => {
                    if attempt > 1 {
                        info!("order fetch succeeded after {} attempts", attempt);
                    }
                    return Ok(orders);
                }
                Err(error) if !error.is_retryable() => {
                    return Err(error);
                }
                Err(error) if attempt >= self.max_attempts => {
                    error!("order fetch failed after {} attempts: {}", attempt, error);
                    return Err(error);
                }
                Err(error) => {
                    warn!(
                        "order fetch failed (attempt {}/{}): {}",
                        attempt, self.max_attempts, error
                    );
                    let ctx = OperationContext::new("orders.retry");
                    log_operation(
                        &ctx,
                        &Operation::ProviderRetry {
                            key: request.cache_key().to_string(),
                            attempt,
                        },
                        &Ok(()),
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = sleep(delay) => {}
                    }

                    // Exponential backoff with jitter
                    delay = cmp::min(delay * 2, self.max_delay);
                    delay += Duration::from_millis(rand::random::<u64>() % 250);
                }
            }
        }
    }
}

/// Provider wrapper that adds automatic tracing to every fetch
pub struct TracedOrderProvider<P: OrderProvider> {
    inner: P,
    trace_id: Uuid,
    fetch_count: Arc<Mutex<u64>>,
}

impl<P: OrderProvider> TracedOrderProvider<P> {
    /// Wrap a provider with tracing
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            trace_id: Uuid::new_v4(),
            fetch_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Get the current trace ID
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Get the number of fetches performed
    pub async fn fetch_count(&self) -> u64 {
        *self.fetch_count.lock().await
    }
}

#[async_trait]
impl<P: OrderProvider> OrderProvider for TracedOrderProvider<P> {
    async fn fetch_orders(
        &self,
        request: &OrderRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<OrderRecord>, FetchError> {
        {
            let mut count = self.fetch_count.lock().await;
            *count += 1;
        }

        let key = request.cache_key();
        info!("[{}] Fetching orders for {}", self.trace_id, key);
        let start = Instant::now();

        let result = self.inner.fetch_orders(request, cancel).await;

        let duration = start.elapsed();
        record_metric(MetricType::Histogram {
            name: "orders.fetch.duration",
            value: duration.as_millis() as f64,
            unit: "ms",
        });

        match &result {
            Ok(orders) => {
                info!(
                    "[{}] Fetched {} orders in {:?}",
                    self.trace_id,
                    orders.len(),
                    duration
                );
                record_metric(MetricType::Gauge {
                    name: "orders.fetch.count",
                    value: orders.len() as f64,
                });
            }
            Err(error) if error.is_cancellation() => {
                debug!("[{}] Order fetch cancelled for {}", self.trace_id, key);
            }
            Err(error) => {
                warn!("[{}] Order fetch failed for {}: {}", self.trace_id, key, error);
            }
        }

        result
    }
}

/// Compose the wrappers into the stack call sites should use
pub type FullyWrappedProvider<F> =
    TracedOrderProvider<RetryableOrderProvider<PagedOrderProvider<F>>>;

/// Helper to build the fully wrapped provider from a bare page fetcher
pub fn create_wrapped_provider<F: OrderPageFetcher>(fetcher: F) -> FullyWrappedProvider<F> {
    let paged = PagedOrderProvider::new(fetcher);
    let retryable = RetryableOrderProvider::new(paged);

    TracedOrderProvider::new(retryable)
}
