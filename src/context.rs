use axum::http::{HeaderMap, Method};

/// Subject
///
/// The resolved caller identity. The empty string is the anonymous subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// RequestContext
///
/// The request-scoped state every gate stage reads and annotates. One instance lives for
/// exactly one request; once the gate lets a request through, it is moved into the
/// request extensions where handlers pick it up through the `AuthUser` extractor.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Empty until the trace stage has run.
    pub trace_id: String,
    pub subject: Subject,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            trace_id: String::new(),
            subject: Subject::anonymous(),
        }
    }
}
