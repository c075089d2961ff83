use thiserror::Error;

use quell_core::BoxError;

/// Errors that can escape an engine evaluation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A counter store failure from a limit method whose policy aborts the
    /// request.
    #[error("counter store error: {0}")]
    Store(#[from] quell_store::StoreError),

    /// The engine was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A continuation failure that is not a throttle signal, propagated
    /// unchanged.
    #[error("request continuation failed: {0}")]
    NextAction(BoxError),
}
