use regex::{Regex, RegexBuilder};

use quell_core::RequestProxy;

use crate::error::ConfigError;

/// Predicate deciding whether a rule (or whitelist entry) applies to a
/// request.
///
/// All configured criteria must hold for the matcher to accept a request; a
/// matcher with no criteria accepts everything. URI patterns are
/// case-insensitive regular expressions tested against the full URI.
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    uri_pattern: Option<String>,
    uri_regex: Option<Regex>,
    method: Option<String>,
    header_name: Option<String>,
    header_value: Option<String>,
    claim_name: Option<String>,
    claim_values: Vec<String>,
}

impl RequestMatcher {
    /// A matcher with no criteria, accepting every request.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// A matcher testing only a URI pattern.
    pub fn for_uri(pattern: &str) -> Result<Self, ConfigError> {
        Self::any().with_uri_pattern(pattern)
    }

    /// Require the URI to match `pattern` (case-insensitive regex).
    pub fn with_uri_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidUriPattern {
                pattern: pattern.to_owned(),
                message: e.to_string(),
            })?;
        self.uri_pattern = Some(pattern.to_owned());
        self.uri_regex = Some(regex);
        Ok(self)
    }

    /// Require an HTTP method (case-insensitive).
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Require a header to be present, optionally with an exact value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.header_name = Some(name.into());
        self.header_value = value;
        self
    }

    /// Require a claim to be present; with a non-empty `values` list, the
    /// claim value must be one of them.
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.claim_name = Some(name.into());
        self.claim_values = values;
        self
    }

    /// Test the matcher against a request.
    #[must_use]
    pub fn matches(&self, request: &dyn RequestProxy) -> bool {
        if let Some(regex) = &self.uri_regex
            && !regex.is_match(request.uri())
        {
            return false;
        }

        if let Some(method) = &self.method
            && !method.eq_ignore_ascii_case(request.method())
        {
            return false;
        }

        if let Some(name) = &self.header_name {
            match request.header(name) {
                None => return false,
                Some(value) => {
                    if let Some(expected) = &self.header_value
                        && value != expected
                    {
                        return false;
                    }
                }
            }
        }

        if let Some(name) = &self.claim_name {
            match request.claim(name) {
                None => return false,
                Some(value) => {
                    if !self.claim_values.is_empty()
                        && !self.claim_values.iter().any(|v| v == value)
                    {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Deterministic description of the configured criteria, used for stable
    /// rule identifiers.
    pub(crate) fn descriptor(&self) -> String {
        format!(
            "uri={:?};method={:?};header={:?}={:?};claim={:?}in{:?}",
            self.uri_pattern,
            self.method,
            self.header_name,
            self.header_value,
            self.claim_name,
            self.claim_values,
        )
    }
}
