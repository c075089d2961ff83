use thiserror::Error;

/// Errors from building or loading a throttling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A rule or whitelist URI pattern failed to compile.
    #[error("invalid URI pattern `{pattern}`: {message}")]
    InvalidUriPattern { pattern: String, message: String },

    /// A limit method carries out-of-range parameters.
    #[error("invalid limit method: {0}")]
    InvalidLimitMethod(String),

    /// A configuration source could not be loaded.
    #[error("config load failed: {0}")]
    Load(String),
}
