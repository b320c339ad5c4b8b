// ShopMetrics - E-commerce Analytics Core
// Root library module

pub mod observability;
pub mod contracts;
pub mod validation;
pub mod pure;
pub mod types;
pub mod builders;
pub mod wrappers;
pub mod store;
pub mod controller;

// Re-export key types
pub use observability::{
    init_logging,
    log_operation,
    record_metric,
    with_trace_id,
    MetricType,
    Operation,
};

pub use contracts::{
    CacheEntry,
    FetchError,
    FetchState,
    GoalProvider,
    MetricRow,
    MetricsProvider,
    MetricsQuery,
    MonthGoal,
    MonthlyGoals,
    OrderCacheKey,
    OrderPageFetcher,
    OrderProvider,
    OrderRecord,
    OrderRequest,
    OrderSnapshot,
    OrderStore,
};

// Re-export validated types
pub use types::{
    AttributionModel,
    MonthKey,
    SegmentFilter,
    ValidatedDateRange,
    ValidatedLimit,
    ValidatedTableName,
};

// Re-export builders
pub use builders::{
    ControllerConfigBuilder,
    MetricsQueryBuilder,
    OrderRequestBuilder,
};

// Re-export wrappers
pub use wrappers::{
    create_wrapped_provider,
    FullyWrappedProvider,
    PagedOrderProvider,
    RetryableOrderProvider,
    TracedOrderProvider,
    ORDER_PAGE_SIZE,
};

// Re-export store and controller
pub use store::{create_memory_store, MemoryOrderStore};
pub use controller::{ControllerConfig, OrderFetchController, DEFAULT_CACHE_TTL};

// Re-export pure functions
pub use pure::aggregate;
pub use pure::countdown;
pub use pure::funnel;
pub use pure::growth;
pub use pure::ratios;
pub use pure::runrate;
pub use pure::series;
pub use pure::sorting;
pub use pure::summary;
pub use pure::timeline;
