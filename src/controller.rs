// Order Fetch Controller
// Mediates every expensive order download: one in-flight provider call per
// composite key, TTL-bounded caching, cooperative cancellation, and an
// advisory countdown for progress reporting. The store is never written by
// anyone else.

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contracts::{
    CacheEntry, FetchError, FetchState, OrderCacheKey, OrderProvider, OrderRecord, OrderRequest,
    OrderSnapshot, OrderStore,
};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::pure::countdown;

/// Default maximum age before a cached payload is considered stale.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Tuning knobs for the controller. The defaults match production behavior;
/// tests shrink them to keep scenarios fast.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum age a `Ready` entry is served without a refetch.
    pub ttl: Duration,
    /// Seconds the advisory countdown starts from for each flight.
    pub countdown_start: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            countdown_start: countdown::COUNTDOWN_START,
        }
    }
}

type FetchOutcome = Result<Arc<Vec<OrderRecord>>, FetchError>;

/// Bookkeeping for one running download. Holding the token cancels the
/// flight; holding the receiver joins its outcome.
struct Inflight {
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<FetchOutcome>>,
    started: Instant,
}

/// The process-wide fetch mediator. Cloning shares all state, so one
/// controller can serve any number of consumers.
#[derive(Clone)]
pub struct OrderFetchController {
    store: Arc<dyn OrderStore>,
    provider: Arc<dyn OrderProvider>,
    inflight: Arc<DashMap<OrderCacheKey, Inflight>>,
    config: ControllerConfig,
}

impl OrderFetchController {
    pub fn new(store: Arc<dyn OrderStore>, provider: Arc<dyn OrderProvider>) -> Self {
        Self::with_config(store, provider, ControllerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn OrderProvider>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            inflight: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Fetch the dataset named by the request, serving a fresh cached copy
    /// when one exists, joining an in-flight download for the same key, or
    /// launching a new one. Concurrent callers for one key share a single
    /// provider call and receive the same outcome.
    pub async fn fetch(&self, request: &OrderRequest) -> FetchOutcome {
        let key = request.cache_key();

        match self.read_entry(&key).await? {
            Some(CacheEntry::Ready { orders, fetched_at }) => {
                let age = Instant::now().saturating_duration_since(fetched_at);
                if age <= self.config.ttl {
                    let mut ctx = OperationContext::new("orders.cache_lookup");
                    ctx.add_attribute("key", key.to_string());
                    log_operation(
                        &ctx,
                        &Operation::CacheHit {
                            key: key.to_string(),
                            order_count: orders.len(),
                        },
                        &Ok(()),
                    );
                    return Ok(orders);
                }
                // Stale payload: discarded, never served alongside the
                // refresh. The launch below overwrites the row.
                let ctx = OperationContext::new("orders.cache_lookup");
                log_operation(
                    &ctx,
                    &Operation::CacheExpired {
                        key: key.to_string(),
                        age_secs: age.as_secs(),
                    },
                    &Ok(()),
                );
            }
            Some(CacheEntry::Loading { .. }) => {
                // Either a flight is running (joined below) or the row is a
                // ghost from a torn-down process; a fresh launch overwrites
                // it either way.
            }
            None => {
                let ctx = OperationContext::new("orders.cache_lookup");
                log_operation(
                    &ctx,
                    &Operation::CacheMiss {
                        key: key.to_string(),
                    },
                    &Ok(()),
                );
            }
        }

        self.join_or_launch(request, key).await
    }

    /// Begin a fetch in the background. The outcome lands in the cache; a
    /// failure other than cancellation is logged and otherwise dropped.
    pub fn start(&self, request: OrderRequest) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(error) = controller.fetch(&request).await {
                if !error.is_cancellation() {
                    warn!(
                        "background fetch for {} failed: {}",
                        request.cache_key(),
                        error
                    );
                }
            }
        })
    }

    /// Consumer went away: cancel the in-flight download for this request,
    /// if any. Cached `Ready` payloads stay for the next consumer.
    pub async fn stop(&self, request: &OrderRequest) {
        self.cancel(&request.cache_key()).await;
    }

    /// Read-only view of one key: running flights report `Loading` with the
    /// current countdown stage; fresh payloads report `Ready`; everything
    /// else, including stale payloads and loading ghosts, reports `Absent`.
    /// Never mutates the cache.
    pub async fn get_orders(&self, key: &OrderCacheKey) -> Result<OrderSnapshot> {
        if let Some(flight) = self.inflight.get(key) {
            let elapsed = flight.started.elapsed().as_secs();
            let remaining = self.config.countdown_start.saturating_sub(elapsed);
            return Ok(OrderSnapshot {
                state: FetchState::Loading,
                orders: None,
                progress_message: Some(countdown::stage_for_remaining(remaining)),
            });
        }

        match self.store.get(key).await? {
            Some(CacheEntry::Ready { orders, fetched_at }) => {
                let age = Instant::now().saturating_duration_since(fetched_at);
                if age <= self.config.ttl {
                    Ok(OrderSnapshot {
                        state: FetchState::Ready,
                        orders: Some(orders),
                        progress_message: None,
                    })
                } else {
                    Ok(OrderSnapshot::absent())
                }
            }
            // A Loading row without a flight behind it is unreachable by a
            // live download; report it as absent so callers refetch cleanly.
            Some(CacheEntry::Loading { .. }) | None => Ok(OrderSnapshot::absent()),
        }
    }

    /// Signal cancellation to the in-flight download for this key and wait
    /// for its teardown, so the key is observably `Absent` on return. No-op
    /// when nothing is in flight.
    pub async fn cancel(&self, key: &OrderCacheKey) {
        let joined = {
            match self.inflight.get(key) {
                Some(flight) => {
                    flight.cancel.cancel();
                    Some(flight.outcome.clone())
                }
                None => None,
            }
        };

        if let Some(rx) = joined {
            info!("cancelling in-flight fetch for {}", key);
            let _ = Self::await_outcome(rx).await;
        }
    }

    /// Evict the key entirely: cancel any running flight, then delete the
    /// cached row. The next fetch starts cold.
    pub async fn invalidate(&self, key: &OrderCacheKey) -> Result<()> {
        self.cancel(key).await;
        self.store.delete(key).await?;

        let ctx = OperationContext::new("orders.invalidate");
        log_operation(
            &ctx,
            &Operation::CacheInvalidate {
                key: key.to_string(),
            },
            &Ok(()),
        );
        Ok(())
    }

    async fn read_entry(&self, key: &OrderCacheKey) -> Result<Option<CacheEntry>, FetchError> {
        self.store
            .get(key)
            .await
            .map_err(|e| FetchError::Transport(format!("cache read failed: {e}")))
    }

    /// Either join the running flight for this key or win the right to
    /// launch one. The map entry is held without awaiting, so exactly one
    /// caller ever launches.
    async fn join_or_launch(&self, request: &OrderRequest, key: OrderCacheKey) -> FetchOutcome {
        let (rx, launched) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().outcome.clone(), false),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                let cancel = CancellationToken::new();
                slot.insert(Inflight {
                    cancel: cancel.clone(),
                    outcome: rx.clone(),
                    started: Instant::now(),
                });
                self.spawn_driver(request.clone(), key.clone(), cancel, tx);
                (rx, true)
            }
        };

        if launched {
            debug!("launched fetch for {}", key);
        } else {
            let ctx = OperationContext::new("orders.fetch");
            log_operation(
                &ctx,
                &Operation::DedupJoin {
                    key: key.to_string(),
                },
                &Ok(()),
            );
        }

        Self::await_outcome(rx).await
    }

    fn spawn_driver(
        &self,
        request: OrderRequest,
        key: OrderCacheKey,
        cancel: CancellationToken,
        tx: watch::Sender<Option<FetchOutcome>>,
    ) {
        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        let inflight = Arc::clone(&self.inflight);

        tokio::spawn(async move {
            // Mark the key Loading before the provider call, so the state
            // transition is visible as soon as the flight exists.
            if let Err(e) = store.set_loading(&key).await {
                warn!("cache bookkeeping failed for {}: {e}", key);
            }

            let result = provider.fetch_orders(&request, cancel.clone()).await;

            // Single check before any cache write: cancellation signaled
            // during the provider call wins over whatever it returned.
            let settled: FetchOutcome = if cancel.is_cancelled() {
                Err(FetchError::Cancelled)
            } else {
                result.map(Arc::new)
            };

            let outcome = match settled {
                Ok(orders) => match store.set_ready(&key, Arc::clone(&orders)).await {
                    Ok(()) => {
                        let mut ctx = OperationContext::new("orders.fetch");
                        ctx.add_attribute("key", key.to_string());
                        log_operation(
                            &ctx,
                            &Operation::ProviderFetch {
                                key: key.to_string(),
                                order_count: orders.len(),
                            },
                            &Ok(()),
                        );
                        Ok(orders)
                    }
                    Err(e) => {
                        if let Err(delete_err) = store.delete(&key).await {
                            error!("cache delete failed for {}: {delete_err}", key);
                        }
                        Err(FetchError::Transport(format!("cache write failed: {e}")))
                    }
                },
                Err(error) => {
                    // Failure and cancellation both leave the key Absent,
                    // never a Loading ghost.
                    if let Err(delete_err) = store.delete(&key).await {
                        error!("cache delete failed for {}: {delete_err}", key);
                    }

                    let mut ctx = OperationContext::new("orders.fetch");
                    ctx.add_attribute("key", key.to_string());
                    if error.is_cancellation() {
                        // Not a failure; nothing surfaces to the user.
                        log_operation(
                            &ctx,
                            &Operation::FetchCancelled {
                                key: key.to_string(),
                            },
                            &Ok(()),
                        );
                    } else {
                        log_operation(
                            &ctx,
                            &Operation::ProviderFetch {
                                key: key.to_string(),
                                order_count: 0,
                            },
                            &Err(anyhow::anyhow!("{error}")),
                        );
                    }
                    Err(error)
                }
            };

            // Teardown order matters: the store row settles before the
            // flight disappears, and joiners wake only after both.
            inflight.remove(&key);
            let _ = tx.send(Some(outcome));
        });
    }

    async fn await_outcome(mut rx: watch::Receiver<Option<FetchOutcome>>) -> FetchOutcome {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without settling; treat as a provider fault.
                return Err(FetchError::Transport(
                    "fetch task dropped before settling".to_string(),
                ));
            }
        }
    }
}
