pub mod aggregator;
pub mod demo;
pub mod learner_state;
pub mod recommendation_engine;
pub mod refresh_coordinator;
pub mod source_cache;
pub mod source_fetcher;
pub mod summary;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{AggregateError, Aggregator, SnapshotSource};
pub use demo::DemoUpstream;
pub use learner_state::{LearnerStateError, LearnerStateStore};
pub use recommendation_engine::RecommendationEngine;
pub use refresh_coordinator::{CoordinatorEvent, RefreshCoordinator, RefreshKind, RefreshOutput};
pub use source_cache::{start_cache_maintenance, SourceCache};
pub use source_fetcher::{FetchError, FetchPolicy, SourceFetchers};
pub use upstream::{HttpUpstreamClient, UpstreamClient, UpstreamError};
