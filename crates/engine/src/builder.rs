use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::error;

use quell_core::RequestProxy;
use quell_rules::{Config, CostExtractor, IdentityExtractor};
use quell_store::CounterStore;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::loader::{ConfigLoader, StaticConfigLoader, spawn_reload_task};
use crate::metrics::EngineMetrics;

/// Default admission-delay poll interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Fluent builder for constructing an [`Engine`].
///
/// A [`CounterStore`] and a configuration source (a [`ConfigLoader`] or an
/// inline [`Config`]) must be supplied; everything else has defaults.
pub struct EngineBuilder {
    store: Option<Arc<dyn CounterStore>>,
    loader: Option<Arc<dyn ConfigLoader>>,
    identity_extractor: Option<IdentityExtractor>,
    cost_extractor: Option<CostExtractor>,
    poll_interval: Duration,
}

impl EngineBuilder {
    /// Create a new builder with all optional fields set to their defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: None,
            loader: None,
            identity_extractor: None,
            cost_extractor: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the counter store implementation.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn ConfigLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Use a fixed configuration (shorthand for a [`StaticConfigLoader`]).
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.loader = Some(Arc::new(StaticConfigLoader::new(config)));
        self
    }

    /// Set the global identity extractor, used by rules without their own.
    #[must_use]
    pub fn identity_extractor(
        mut self,
        extractor: impl Fn(&dyn RequestProxy) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.identity_extractor = Some(Arc::new(extractor));
        self
    }

    /// Set the global cost extractor, used by rules without their own.
    #[must_use]
    pub fn cost_extractor(
        mut self,
        extractor: impl Fn(&dyn RequestProxy) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.cost_extractor = Some(Arc::new(extractor));
        self
    }

    /// Override the admission-delay poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consume the builder and produce a configured [`Engine`].
    ///
    /// Performs the initial configuration load. A failed initial load is
    /// logged and the engine starts with an empty rule set; with a dynamic
    /// loader a later successful reload recovers. When the loader declares a
    /// reload interval, the background reload task is spawned here.
    pub async fn build(self) -> Result<Engine, EngineError> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Configuration("counter store is required".into()))?;

        let loader = self
            .loader
            .ok_or_else(|| EngineError::Configuration("config loader is required".into()))?;

        let initial = match loader.load().await {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "initial config load failed, starting with empty rule set");
                Config::new("")
            }
        };

        let snapshot = Arc::new(ArcSwap::from_pointee(initial));
        let shutdown = CancellationToken::new();

        if let Some(interval) = loader.reload_interval() {
            spawn_reload_task(
                Arc::clone(&snapshot),
                Arc::clone(&loader),
                interval,
                shutdown.clone(),
            );
        }

        Ok(Engine {
            store,
            snapshot,
            identity_extractor: self.identity_extractor,
            cost_extractor: self.cost_extractor,
            poll_interval: self.poll_interval,
            metrics: Arc::new(EngineMetrics::default()),
            shutdown,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
