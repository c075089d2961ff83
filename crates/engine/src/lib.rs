pub mod builder;
pub mod cleanup;
pub mod engine;
pub mod error;
pub mod loader;
pub mod metrics;

pub use builder::EngineBuilder;
pub use cleanup::{CleanupRoutine, RequestOutcome, run_cleanup};
pub use engine::Engine;
pub use error::EngineError;
pub use loader::{ConfigLoader, FnConfigLoader, StaticConfigLoader};
pub use metrics::{EngineMetrics, MetricsSnapshot};
