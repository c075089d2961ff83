use std::time::Duration;

use serde::{Deserialize, Serialize};

use quell_core::ServiceName;

use crate::error::ConfigError;
use crate::limit::LimitMethod;
use crate::matcher::RequestMatcher;
use crate::rule::Rule;

/// An immutable throttling configuration snapshot.
///
/// Rules are evaluated in declared order; the whitelist short-circuits the
/// whole evaluation; `unique_name` participates in every counter key.
#[derive(Debug, Clone)]
pub struct Config {
    pub rules: Vec<Rule>,
    pub whitelist: Vec<RequestMatcher>,
    pub unique_name: ServiceName,
}

impl Config {
    /// An empty configuration for the given service name.
    #[must_use]
    pub fn new(unique_name: impl Into<ServiceName>) -> Self {
        Self {
            rules: Vec::new(),
            whitelist: Vec::new(),
            unique_name: unique_name.into(),
        }
    }

    /// Append a rule. Declared order is evaluation order.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append a whitelist matcher.
    #[must_use]
    pub fn with_whitelisted(mut self, matcher: RequestMatcher) -> Self {
        self.whitelist.push(matcher);
        self
    }
}

/// Wire form of a matcher, shared by rules and the whitelist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MatcherConfig {
    pub uri_pattern: Option<String>,
    pub method: Option<String>,
    pub header_name: Option<String>,
    pub header_value: Option<String>,
    pub claim_name: Option<String>,
    pub claim_values: Option<Vec<String>>,
}

impl MatcherConfig {
    /// Compile the wire form into a runtime matcher.
    pub fn compile(&self) -> Result<RequestMatcher, ConfigError> {
        let mut matcher = RequestMatcher::any();
        if let Some(pattern) = &self.uri_pattern {
            matcher = matcher.with_uri_pattern(pattern)?;
        }
        if let Some(method) = &self.method {
            matcher = matcher.with_method(method.clone());
        }
        if let Some(name) = &self.header_name {
            matcher = matcher.with_header(name.clone(), self.header_value.clone());
        }
        if let Some(name) = &self.claim_name {
            matcher = matcher.with_claim(name.clone(), self.claim_values.clone().unwrap_or_default());
        }
        Ok(matcher)
    }
}

/// Wire form of one rule.
///
/// Identity and cost extractors are code, supplied programmatically after
/// compilation; they are not part of the wire schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleConfig {
    #[serde(flatten)]
    pub matcher: MatcherConfig,
    pub limit_method: LimitMethod,
    #[serde(default, rename = "MaxDelayInSeconds")]
    pub max_delay_seconds: u64,
}

impl RuleConfig {
    /// Compile the wire form into a runtime rule.
    pub fn compile(&self) -> Result<Rule, ConfigError> {
        self.limit_method.validate()?;
        let matcher = self.matcher.compile()?;
        Ok(Rule::new(matcher, self.limit_method.clone())
            .with_max_delay(Duration::from_secs(self.max_delay_seconds)))
    }
}

/// The stable, host-agnostic configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default, rename = "WhiteList")]
    pub white_list: Vec<MatcherConfig>,
    pub unique_name: String,
}

impl TryFrom<ConfigFile> for Config {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let mut config = Config::new(file.unique_name);
        for rule in &file.rules {
            config = config.with_rule(rule.compile()?);
        }
        for matcher in &file.white_list {
            config = config.with_whitelisted(matcher.compile()?);
        }
        Ok(config)
    }
}
