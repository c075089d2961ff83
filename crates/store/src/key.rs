use serde::{Deserialize, Serialize};

use quell_core::ServiceName;

/// The kind of counter cell being addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Fixed-window request counter.
    Window,
    /// One sub-bucket of a sliding window.
    Bucket,
    /// Bounded concurrency cell.
    Semaphore,
    /// Circuit-breaker failure counter.
    Failures,
    /// Circuit-breaker trial gate.
    Trial,
}

impl CounterKind {
    /// Return a string representation of the counter kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Window => "window",
            Self::Bucket => "bucket",
            Self::Semaphore => "semaphore",
            Self::Failures => "failures",
            Self::Trial => "trial",
        }
    }
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key addressing one counter cell in the store.
///
/// Every key embeds the owning service's unique name so that services
/// sharing a store backend cannot corrupt each other's counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub service: ServiceName,
    pub kind: CounterKind,
    pub cell: String,
}

impl CounterKey {
    /// Create a new counter key.
    #[must_use]
    pub fn new(service: impl Into<ServiceName>, kind: CounterKind, cell: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            cell: cell.into(),
        }
    }

    /// Return a canonical string representation: `service:kind:cell`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.service, self.kind, self.cell)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
