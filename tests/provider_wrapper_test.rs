// Provider Stack Tests - the composed wrapper stack under a real controller
// A bare page fetcher goes through paging, retries, and tracing, then serves
// an OrderFetchController the way production wiring does.

use anyhow::Result;
use async_trait::async_trait;
use shopmetrics::contracts::{
    FetchError, FetchState, OrderPageFetcher, OrderRecord, OrderRequest,
};
use shopmetrics::store::create_memory_store;
use shopmetrics::wrappers::create_wrapped_provider;
use shopmetrics::{OrderFetchController, OrderRequestBuilder};
use std::cmp;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Page fetcher over a fixed dataset with per-page latency and optional
/// leading failures.
struct PagedBackend {
    dataset: Vec<OrderRecord>,
    page_latency: Duration,
    fail_first: AtomicUsize,
    page_calls: Arc<AtomicUsize>,
}

impl PagedBackend {
    fn new(order_count: usize, page_latency: Duration) -> Self {
        let dataset = (0..order_count)
            .map(|i| OrderRecord {
                transaction_id: format!("t{i}"),
                placed_on: None,
                status: "paid".to_string(),
                revenue: 25.0,
                segment: Some("organic".to_string()),
                source: Some("google".to_string()),
                medium: Some("cpc".to_string()),
                campaign: None,
            })
            .collect();
        Self {
            dataset,
            page_latency,
            fail_first: AtomicUsize::new(0),
            page_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_first(self, failures: usize) -> Self {
        self.fail_first.store(failures, Ordering::SeqCst);
        self
    }

    /// Handle to the page-call counter, taken before the backend moves into
    /// the wrapper stack.
    fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.page_calls)
    }
}

#[async_trait]
impl OrderPageFetcher for PagedBackend {
    async fn fetch_page(
        &self,
        _request: &OrderRequest,
        offset: usize,
        page_size: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<OrderRecord>, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = sleep(self.page_latency) => {}
        }

        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Err(FetchError::Transport("upstream hiccup".into()));
        }

        if offset >= self.dataset.len() {
            return Ok(Vec::new());
        }
        let end = cmp::min(offset + page_size, self.dataset.len());
        Ok(self.dataset[offset..end].to_vec())
    }
}

fn sample_request() -> Result<OrderRequest> {
    OrderRequestBuilder::new()
        .table("store_main")?
        .dates("2024-01-01", "2024-01-31")?
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_full_stack_serves_joined_dataset() -> Result<()> {
    let backend = PagedBackend::new(250, Duration::from_millis(10));
    let page_calls = backend.call_counter();
    let provider = Arc::new(create_wrapped_provider(backend));
    let controller = OrderFetchController::new(create_memory_store(), provider.clone());
    let request = sample_request()?;

    let orders = controller.fetch(&request).await.unwrap();
    assert_eq!(orders.len(), 250);
    assert_eq!(orders[0].transaction_id, "t0");
    assert_eq!(orders[249].transaction_id, "t249");
    assert_eq!(provider.fetch_count().await, 1);
    // Two full pages and the short trailing one.
    assert_eq!(page_calls.load(Ordering::SeqCst), 3);

    let snapshot = controller.get_orders(&request.cache_key()).await?;
    assert_eq!(snapshot.state, FetchState::Ready);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_transient_page_failure_is_retried_transparently() -> Result<()> {
    let backend = PagedBackend::new(150, Duration::from_millis(10)).failing_first(1);
    let page_calls = backend.call_counter();
    let provider = Arc::new(create_wrapped_provider(backend));
    let controller = OrderFetchController::new(create_memory_store(), provider);
    let request = sample_request()?;

    let orders = controller.fetch(&request).await.unwrap();
    assert_eq!(orders.len(), 150);

    // First attempt died on its first page; the retry re-joined all pages:
    // one failed page, then a full page and the short trailing one.
    assert_eq!(page_calls.load(Ordering::SeqCst), 3);

    let snapshot = controller.get_orders(&request.cache_key()).await?;
    assert_eq!(snapshot.state, FetchState::Ready);
    assert_eq!(snapshot.orders.map(|orders| orders.len()), Some(150));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reaches_the_page_fetcher() -> Result<()> {
    let backend = PagedBackend::new(5000, Duration::from_secs(10));
    let provider = Arc::new(create_wrapped_provider(backend));
    let controller = OrderFetchController::new(create_memory_store(), provider);
    let request = OrderRequestBuilder::new()
        .table("store_main")?
        .dates("2024-01-01", "2024-01-31")?
        .limit(5000)?
        .build()?;
    let key = request.cache_key();

    let fetcher = {
        let controller = controller.clone();
        let request = request.clone();
        tokio::spawn(async move { controller.fetch(&request).await })
    };

    // Cancel partway through the multi-page join.
    sleep(Duration::from_secs(25)).await;
    controller.cancel(&key).await;

    let outcome = fetcher.await?;
    assert!(outcome.unwrap_err().is_cancellation());
    assert_eq!(controller.get_orders(&key).await?.state, FetchState::Absent);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_limit_caps_the_join_but_not_the_key() -> Result<()> {
    let backend = PagedBackend::new(400, Duration::from_millis(10));
    let provider = Arc::new(create_wrapped_provider(backend));
    let controller = OrderFetchController::new(create_memory_store(), provider.clone());

    let capped = OrderRequestBuilder::new()
        .table("store_main")?
        .dates("2024-01-01", "2024-01-31")?
        .limit(150)?
        .build()?;
    let uncapped = sample_request()?;

    let orders = controller.fetch(&capped).await.unwrap();
    assert_eq!(orders.len(), 150);

    // Same dataset, different limit: the cached payload is reused as-is.
    let cached = controller.fetch(&uncapped).await.unwrap();
    assert_eq!(cached.len(), 150);
    assert_eq!(provider.fetch_count().await, 1);
    Ok(())
}
