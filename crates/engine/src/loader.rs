use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use quell_rules::{Config, ConfigError};

/// Produces [`Config`] snapshots for the engine.
///
/// A loader that reports no reload interval is called once; its result
/// becomes the permanent snapshot. With an interval, the engine re-invokes
/// it on that cadence and atomically publishes each new snapshot.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// Produce a fresh configuration snapshot.
    async fn load(&self) -> Result<Config, ConfigError>;

    /// How often to reload, or `None` for a single load at startup.
    fn reload_interval(&self) -> Option<Duration> {
        None
    }
}

/// Loader returning a fixed configuration.
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wrap a ready-made configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigLoader for StaticConfigLoader {
    async fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.config.clone())
    }
}

/// Loader backed by an async closure, optionally reloaded on an interval.
///
/// The closure typically reads a file, a database row, or a remote endpoint
/// and builds a [`Config`] from it.
pub struct FnConfigLoader {
    load_fn: Box<dyn Fn() -> BoxFuture<'static, Result<Config, ConfigError>> + Send + Sync>,
    interval: Option<Duration>,
}

impl FnConfigLoader {
    /// Create a loader from an async closure.
    pub fn new<F>(load_fn: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Config, ConfigError>> + Send + Sync + 'static,
    {
        Self {
            load_fn: Box::new(load_fn),
            interval: None,
        }
    }

    /// Reload on the given interval.
    #[must_use]
    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

#[async_trait]
impl ConfigLoader for FnConfigLoader {
    async fn load(&self) -> Result<Config, ConfigError> {
        (self.load_fn)().await
    }

    fn reload_interval(&self) -> Option<Duration> {
        self.interval
    }
}

/// Spawn the background reload loop for a dynamic loader.
///
/// Each tick produces a whole new snapshot that replaces the current one by
/// atomic pointer swap. Load failures keep the last good snapshot. A load
/// already in flight when the engine is disposed completes and is then
/// discarded.
pub(crate) fn spawn_reload_task(
    snapshot: Arc<ArcSwap<Config>>,
    loader: Arc<dyn ConfigLoader>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("config reload task stopping");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    let loaded = loader.load().await;
                    if shutdown.is_cancelled() {
                        debug!("discarding config loaded after dispose");
                        break;
                    }
                    match loaded {
                        Ok(config) => {
                            snapshot.store(Arc::new(config));
                            info!("throttling config reloaded");
                        }
                        Err(e) => {
                            error!(error = %e, "config reload failed, keeping last good snapshot");
                        }
                    }
                }
            }
        }
    });
}
