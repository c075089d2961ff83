pub mod config;
pub mod error;
pub mod limit;
pub mod matcher;
pub mod result;
pub mod rule;

pub use config::{Config, ConfigFile, MatcherConfig, RuleConfig};
pub use error::ConfigError;
pub use limit::{CircuitBreaker, FixedWindow, LimitContext, LimitMethod, Semaphore, SlidingWindow};
pub use matcher::RequestMatcher;
pub use result::{CounterId, LimitCheckResult};
pub use rule::{CostExtractor, IdentityExtractor, Rule};
