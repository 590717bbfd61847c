//! The fluent declaration API: `listener.mock()...create()` (spec §6
//! "`listener.mock(options) -> mockHandle`").
//!
//! Field setters accumulate a conformed [`HttpFieldPredicates`] /
//! [`ResponseRecord`] directly — Rust's type system already rules out most
//! of what spec §4.3's validator exists to catch in a dynamically-typed
//! host. `create()` still runs the few genuinely dynamic checks (regex
//! compilation already happened by construction here since callers pass
//! `Regex` values; status code range and delay sign cannot be caught by the
//! type system and are checked here, aggregated, per spec §4.3's
//! error-format and aggregation rules).

use std::sync::Arc;

use regex::Regex;

use crate::error::{NetmockError, PendingMockError, ValidationError};
use crate::mock::{HttpFieldPredicates, HttpMockCell, HttpRequestPredicate, MockCell};
use crate::predicate::Predicate;
use crate::request::CanonicalRequest;
use crate::resolver::{Bufferable, FieldValue};
use crate::response::{ResponseDescriptor, ResponseRecord};
use crate::validate::{
    aggregate, classify_pattern, conform_pattern, conform_predicate_leaf, late_bound_status_code,
    validate_delay_ms, validate_status_code, Shape,
};

use super::server::HttpServer;

pub struct HttpMockBuilder<'a> {
    server: &'a HttpServer,
    fields: HttpFieldPredicates,
    whole_request: Option<Arc<dyn Fn(&CanonicalRequest) -> bool + Send + Sync>>,
    response: ResponseRecord,
    whole_response:
        Option<Arc<dyn Fn(&CanonicalRequest, &[u8]) -> ResponseRecord + Send + Sync>>,
    status_code_raw: Option<i64>,
    header_delay_raw: Option<i64>,
    body_delay_raw: Option<i64>,
    /// Raw, not-yet-conformed inputs for the slots that are still genuinely
    /// dynamic (spec §4.3) — conformed at `create()` time via
    /// [`validate::conform_pattern`]/[`validate::conform_predicate_leaf`].
    pathname_pattern_raw: Option<String>,
    header_pattern_raw: Vec<(String, String)>,
    header_repeated_patterns_raw: Vec<(String, Vec<String>)>,
}

impl<'a> HttpMockBuilder<'a> {
    pub(crate) fn new(server: &'a HttpServer) -> Self {
        Self {
            server,
            fields: HttpFieldPredicates::default(),
            whole_request: None,
            response: ResponseRecord::default(),
            whole_response: None,
            status_code_raw: None,
            header_delay_raw: None,
            body_delay_raw: None,
            pathname_pattern_raw: None,
            header_pattern_raw: Vec::new(),
            header_repeated_patterns_raw: Vec::new(),
        }
    }

    // -- request predicate ------------------------------------------------

    pub fn method(mut self, method: &str) -> Self {
        self.fields.method = Predicate::str(method.to_ascii_uppercase());
        self
    }

    pub fn pathname(mut self, pathname: impl Into<String>) -> Self {
        self.fields.pathname = Predicate::str(pathname.into());
        self
    }

    pub fn pathname_regex(mut self, re: Regex) -> Self {
        self.fields.pathname = Predicate::regex(re);
        self
    }

    /// Accept a single dynamically-typed pattern, `/.../ `-delimited for a
    /// regex or plain otherwise — the one slot here that really is still a
    /// `string | RegExp` union at declaration time (spec §4.3), conformed in
    /// `create()` via [`validate::conform_pattern`].
    pub fn pathname_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pathname_pattern_raw = Some(pattern.into());
        self
    }

    pub fn pathname_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&crate::predicate::Actual) -> bool + Send + Sync + 'static,
    {
        self.fields.pathname = Predicate::callable(f);
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.fields.query = Predicate::str(query.into());
        self
    }

    pub fn match_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.headers.insert(name.into(), Predicate::str(value.into()));
        self
    }

    pub fn match_header_regex(mut self, name: impl Into<String>, re: Regex) -> Self {
        self.fields.headers.insert(name.into(), Predicate::regex(re));
        self
    }

    /// Match a repeated header by the exact sequence of values it must carry
    /// (spec §4.4 "An array predicate matches when the actual repeated-header
    /// values align element-wise... "; §8 "fails if the number of
    /// occurrences differs").
    pub fn match_header_repeated(mut self, name: impl Into<String>, values: &[&str]) -> Self {
        self.fields.headers.insert(
            name.into(),
            Predicate::Seq(values.iter().map(|v| Predicate::str(*v)).collect()),
        );
        self
    }

    /// Same dynamically-typed pattern acceptance as [`Self::pathname_pattern`],
    /// for a single header value.
    pub fn match_header_pattern(
        mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        self.header_pattern_raw.push((name.into(), pattern.into()));
        self
    }

    /// A repeated header whose values are each independently classified as a
    /// pattern (spec §4.3's array-recursion over a dynamically-typed leaf).
    pub fn match_header_repeated_patterns(
        mut self,
        name: impl Into<String>,
        patterns: &[&str],
    ) -> Self {
        self.header_repeated_patterns_raw
            .push((name.into(), patterns.iter().map(|p| p.to_string()).collect()));
        self
    }

    pub fn body_str(mut self, body: impl Into<String>) -> Self {
        self.fields.body = Predicate::str(body.into());
        self
    }

    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.fields.body = Predicate::bytes(body.into());
        self
    }

    pub fn body_regex(mut self, re: Regex) -> Self {
        self.fields.body = Predicate::regex(re);
        self
    }

    /// Structural JSON body matching (spec §8 scenario 2, `jsonMatch(...)`).
    pub fn body_json(mut self, value: serde_json::Value) -> Self {
        self.fields.body = Predicate::from_json(value);
        self
    }

    /// Replace the whole field-based predicate with a single
    /// `(request) -> bool` callable (spec §3 "a whole-request callable").
    pub fn request_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&CanonicalRequest) -> bool + Send + Sync + 'static,
    {
        self.whole_request = Some(Arc::new(f));
        self
    }

    // -- response descriptor -----------------------------------------------

    pub fn status(mut self, code: i64) -> Self {
        self.status_code_raw = Some(code);
        self.response.status_code = FieldValue::literal(code);
        self
    }

    pub fn status_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&CanonicalRequest, &[u8]) -> i64 + Send + Sync + 'static,
    {
        self.response.status_code = late_bound_status_code("options.res.statusCode".to_string(), Arc::new(f));
        self
    }

    pub fn response_body(mut self, body: impl Bufferable) -> Self {
        self.response.body = body.into_field();
        self
    }

    pub fn response_body_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&CanonicalRequest, &[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.response.body = FieldValue::callable(f);
        self
    }

    pub fn response_header(mut self, name: impl Into<String>, value: impl Bufferable) -> Self {
        self.response.headers.push((name.into(), value.into_field()));
        self
    }

    pub fn header_delay_ms(mut self, ms: i64) -> Self {
        self.header_delay_raw = Some(ms);
        self.response.header_delay = FieldValue::literal(ms);
        self
    }

    pub fn body_delay_ms(mut self, ms: i64) -> Self {
        self.body_delay_raw = Some(ms);
        self.response.body_delay = FieldValue::literal(ms);
        self
    }

    pub fn destroy_socket(mut self, destroy: bool) -> Self {
        self.response.destroy_socket = FieldValue::literal(destroy);
        self
    }

    /// Replace the whole response record with a single
    /// `(request, body) -> record` callable (spec §3).
    pub fn response_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&CanonicalRequest, &[u8]) -> ResponseRecord + Send + Sync + 'static,
    {
        self.whole_response = Some(Arc::new(f));
        self
    }

    /// Validate and register the mock (spec §4.3 `conform(...)`, §4.6
    /// "Registration appends").
    pub fn create(mut self) -> Result<HttpMockHandle, NetmockError> {
        let mut batches: Vec<Vec<String>> = Vec::new();

        if let Some(code) = self.status_code_raw {
            if let Err(e) = validate_status_code("options.res.statusCode", code) {
                batches.push(e);
            }
        }
        if let Some(ms) = self.header_delay_raw {
            if let Err(e) = validate_delay_ms("options.res.headerDelay", ms) {
                batches.push(e);
            }
        }
        if let Some(ms) = self.body_delay_raw {
            if let Err(e) = validate_delay_ms("options.res.bodyDelay", ms) {
                batches.push(e);
            }
        }

        if let Some(raw) = self.pathname_pattern_raw.take() {
            match conform_pattern("options.req.pathname", &raw) {
                Ok(p) => self.fields.pathname = p,
                Err(e) => batches.push(e),
            }
        }

        for (name, raw) in std::mem::take(&mut self.header_pattern_raw) {
            let path = format!("options.req.headers.{name}");
            match conform_pattern(&path, &raw) {
                Ok(p) => {
                    self.fields.headers.insert(name, p);
                }
                Err(e) => batches.push(e),
            }
        }

        for (name, patterns) in std::mem::take(&mut self.header_repeated_patterns_raw) {
            let path = format!("options.req.headers.{name}");
            let shape = Shape::Array(patterns.iter().map(|p| classify_pattern(p)).collect());
            match conform_predicate_leaf(&path, &shape) {
                Ok(p) => {
                    self.fields.headers.insert(name, p);
                }
                Err(e) => batches.push(e),
            }
        }

        if let Err(issues) = aggregate(batches) {
            return Err(NetmockError::Validation(ValidationError::new(issues)));
        }

        let request = match self.whole_request {
            Some(f) => HttpRequestPredicate::Whole(f),
            None => HttpRequestPredicate::Fields(self.fields),
        };
        let response = match self.whole_response {
            Some(f) => ResponseDescriptor::Callable(f),
            None => ResponseDescriptor::Record(self.response),
        };

        let id = self.server.mocks.next_id();
        let cell = Arc::new(HttpMockCell::new(id, request, response));
        self.server.mocks.register(cell.clone());

        Ok(HttpMockHandle { cell })
    }
}

/// A handle to a registered HTTP mock (spec §6 `mockHandle`).
pub struct HttpMockHandle {
    cell: Arc<HttpMockCell>,
}

impl HttpMockHandle {
    pub fn is_matched(&self) -> bool {
        self.cell.is_done()
    }

    /// Raises if this mock is still pending (spec §4.6 `assertDone()`).
    pub fn assert_done(&self) -> Result<(), PendingMockError> {
        if self.cell.is_done() {
            Ok(())
        } else {
            Err(PendingMockError::new(vec![self.cell.display_form()]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathname_pattern_classifies_slash_delimited_string_as_regex() {
        let server = HttpServer::start(0).unwrap();
        let handle = server
            .mock()
            .method("GET")
            .pathname_pattern("/^/items/[0-9]+$/")
            .status(200)
            .create()
            .unwrap();
        match handle.cell.request {
            HttpRequestPredicate::Fields(ref p) => {
                assert!(matches!(p.pathname, Predicate::Regex(_)));
            }
            _ => panic!("expected field predicates"),
        }
        server.teardown();
    }

    #[test]
    fn pathname_pattern_treats_undelimited_string_as_literal() {
        let server = HttpServer::start(0).unwrap();
        let handle = server
            .mock()
            .method("GET")
            .pathname_pattern("/items")
            .status(200)
            .create()
            .unwrap();
        match handle.cell.request {
            HttpRequestPredicate::Fields(ref p) => {
                assert!(matches!(&p.pathname, Predicate::Str(s) if s == "/items"));
            }
            _ => panic!("expected field predicates"),
        }
        server.teardown();
    }

    #[test]
    fn pathname_pattern_rejects_bad_regex_at_create_time() {
        let server = HttpServer::start(0).unwrap();
        let err = server
            .mock()
            .method("GET")
            .pathname_pattern("/(unterminated/")
            .status(200)
            .create()
            .unwrap_err();
        assert!(matches!(err, NetmockError::Validation(_)));
        server.teardown();
    }

    #[test]
    fn match_header_pattern_conforms_into_the_field_predicate() {
        let server = HttpServer::start(0).unwrap();
        let handle = server
            .mock()
            .method("GET")
            .pathname("/")
            .match_header_pattern("X-Trace", "/^[a-f0-9]+$/")
            .status(200)
            .create()
            .unwrap();
        match handle.cell.request {
            HttpRequestPredicate::Fields(ref p) => {
                assert!(matches!(p.headers.get("X-Trace"), Some(Predicate::Regex(_))));
            }
            _ => panic!("expected field predicates"),
        }
        server.teardown();
    }

    #[test]
    fn match_header_repeated_patterns_produces_a_seq_of_conformed_leaves() {
        let server = HttpServer::start(0).unwrap();
        let handle = server
            .mock()
            .method("GET")
            .pathname("/")
            .match_header_repeated_patterns("X-Tag", &["/^a$/", "plain"])
            .status(200)
            .create()
            .unwrap();
        match handle.cell.request {
            HttpRequestPredicate::Fields(ref p) => match p.headers.get("X-Tag") {
                Some(Predicate::Seq(items)) => {
                    assert!(matches!(items[0], Predicate::Regex(_)));
                    assert!(matches!(&items[1], Predicate::Str(s) if s == "plain"));
                }
                _ => panic!("expected a Seq predicate"),
            },
            _ => panic!("expected field predicates"),
        }
        server.teardown();
    }

    #[test]
    fn batches_issues_across_both_delay_and_pattern_errors() {
        let server = HttpServer::start(0).unwrap();
        let err = server
            .mock()
            .method("GET")
            .pathname_pattern("//")
            .status(200)
            .body_delay_ms(-5)
            .create()
            .unwrap_err();
        match err {
            NetmockError::Validation(e) => assert_eq!(e.issues().len(), 2),
            other => panic!("expected a validation error, got {other:?}"),
        }
        server.teardown();
    }
}
