use std::collections::HashMap;

/// Read-only view of an in-flight request, as exposed by the host framework.
///
/// The engine never mutates the request; it only inspects the fields a
/// throttling decision can depend on. Header lookup is case-insensitive.
pub trait RequestProxy: Send + Sync {
    /// HTTP method, e.g. `GET`.
    fn method(&self) -> &str;

    /// Full request URI, including the query string if present.
    fn uri(&self) -> &str;

    /// Request URI with the query string stripped.
    fn uri_without_query(&self) -> &str;

    /// Look up a header value. `name` is matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Look up a query-string parameter by name.
    fn query_param(&self, name: &str) -> Option<&str>;

    /// Look up an entry in the opaque claims bag (e.g. JWT claims).
    fn claim(&self, name: &str) -> Option<&str>;
}

/// Owned [`RequestProxy`] implementation.
///
/// Hosts without a framework adapter can build one per request; tests use it
/// throughout. Header keys are stored lowercased, query parameters are
/// parsed once from the URI.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    method: String,
    uri: String,
    path_end: usize,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    claims: HashMap<String, String>,
}

impl RequestSnapshot {
    /// Create a snapshot from a method and a URI (query string optional).
    #[must_use]
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let path_end = uri.find('?').unwrap_or(uri.len());
        let query = parse_query(&uri[path_end..]);
        Self {
            method: method.into(),
            uri,
            path_end,
            headers: HashMap::new(),
            query,
            claims: HashMap::new(),
        }
    }

    /// Attach a header. The name is lowercased for case-insensitive lookup.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a claim to the claims bag.
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }
}

/// Parse a raw query string (with or without the leading `?`) into a map.
fn parse_query(raw: &str) -> HashMap<String, String> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_owned(), v.to_owned()),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

impl RequestProxy for RequestSnapshot {
    fn method(&self) -> &str {
        &self.method
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn uri_without_query(&self) -> &str {
        &self.uri[..self.path_end]
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(String::as_str)
    }
}
