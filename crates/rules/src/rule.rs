use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};

use quell_core::{RequestProxy, RuleId, ServiceName};
use quell_store::{CounterStore, StoreError};

use crate::limit::{LimitContext, LimitMethod};
use crate::matcher::RequestMatcher;
use crate::result::LimitCheckResult;

/// Extracts the caller identity a counter should be scoped to. `None` means
/// the counter is shared by all callers of the rule.
pub type IdentityExtractor = Arc<dyn Fn(&dyn RequestProxy) -> Option<String> + Send + Sync>;

/// Extracts the weight a request contributes to a counter.
pub type CostExtractor = Arc<dyn Fn(&dyn RequestProxy) -> u64 + Send + Sync>;

/// One throttling rule: a matcher, a limit method, an admission-delay
/// budget, and optional per-rule extractor overrides.
///
/// The rule id is derived from the matcher and limit parameters, so equal
/// rules address the same counters regardless of their position in the
/// config.
#[derive(Clone)]
pub struct Rule {
    id: RuleId,
    matcher: RequestMatcher,
    limit: LimitMethod,
    max_delay: Duration,
    identity_extractor: Option<IdentityExtractor>,
    cost_extractor: Option<CostExtractor>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("matcher", &self.matcher)
            .field("limit", &self.limit)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Rule {
    /// Create a rule with no delay budget and no extractor overrides.
    #[must_use]
    pub fn new(matcher: RequestMatcher, limit: LimitMethod) -> Self {
        let id = derive_id(&matcher, &limit);
        Self {
            id,
            matcher,
            limit,
            max_delay: Duration::ZERO,
            identity_extractor: None,
            cost_extractor: None,
        }
    }

    /// Allow an exceeded request to wait up to `max_delay` for admission.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Override the identity extractor for this rule only.
    #[must_use]
    pub fn with_identity_extractor(
        mut self,
        extractor: impl Fn(&dyn RequestProxy) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.identity_extractor = Some(Arc::new(extractor));
        self
    }

    /// Override the cost extractor for this rule only.
    #[must_use]
    pub fn with_cost_extractor(
        mut self,
        extractor: impl Fn(&dyn RequestProxy) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.cost_extractor = Some(Arc::new(extractor));
        self
    }

    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn matcher(&self) -> &RequestMatcher {
        &self.matcher
    }

    pub fn limit(&self) -> &LimitMethod {
        &self.limit
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Resolve the request cost: the rule's extractor if set, else the
    /// global one, else a constant 1.
    ///
    /// Fallbacks are resolved here at evaluation time, so applying globals
    /// is idempotent and never overwrites a per-rule override.
    #[must_use]
    pub fn request_cost(&self, request: &dyn RequestProxy, global: Option<&CostExtractor>) -> u64 {
        match self.cost_extractor.as_ref().or(global) {
            Some(extract) => extract(request),
            None => 1,
        }
    }

    /// Resolve the caller identity: the rule's extractor if set, else the
    /// global one, else none.
    #[must_use]
    pub fn identity(
        &self,
        request: &dyn RequestProxy,
        global: Option<&IdentityExtractor>,
    ) -> Option<String> {
        self.identity_extractor
            .as_ref()
            .or(global)
            .and_then(|extract| extract(request))
    }

    /// Evaluate the rule against a request.
    ///
    /// Returns `None` when the matcher rejects the request; otherwise the
    /// limit method's decision.
    pub async fn evaluate(
        &self,
        request: &dyn RequestProxy,
        store: &dyn CounterStore,
        service: &ServiceName,
        global_identity: Option<&IdentityExtractor>,
        global_cost: Option<&CostExtractor>,
    ) -> Result<Option<LimitCheckResult>, StoreError> {
        if !self.matcher.matches(request) {
            return Ok(None);
        }

        let cost = self.request_cost(request, global_cost);
        let identity = self.identity(request, global_identity);
        let cx = LimitContext {
            store,
            service,
            rule: &self.id,
            identity: identity.as_deref(),
            cost,
            now: Utc::now(),
        };
        self.limit.is_exceeded(&cx).await.map(Some)
    }
}

/// Stable rule identifier: the matcher criteria and limit parameters hashed
/// together. Position in the config does not influence it.
fn derive_id(matcher: &RequestMatcher, limit: &LimitMethod) -> RuleId {
    let mut hasher = Sha256::new();
    hasher.update(matcher.descriptor().as_bytes());
    if let Ok(json) = serde_json::to_string(limit) {
        hasher.update(json.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    RuleId::new(&digest[..12])
}
