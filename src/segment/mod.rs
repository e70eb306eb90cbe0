pub mod catalog;
pub mod fetcher;
pub mod scheduler;

pub use catalog::{CatalogEntry, CatalogNamespace, SegmentCatalog};
pub use fetcher::{FetchMetrics, HlsSegmentFetcher, MetricsSubscriber, SegmentSource, DEFAULT_SEGMENT_TIMEOUT};
pub use scheduler::{
    BufferSubscriber, PrefetchTelemetry, SchedulerSettings, SegmentPrefetchScheduler, TelemetrySubscriber,
};
