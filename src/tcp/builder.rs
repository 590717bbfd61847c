//! The fluent TCP declaration API, including the pinning API
//! (`mockHandle.mock(options) -> mockHandle`, spec §6, §4.5).

use std::sync::Arc;

use regex::Regex;

use crate::error::{NetmockError, PendingMockError, ValidationError};
use crate::mock::{MockCell, PinRecord, TcpMockCell, TcpMockKind, TcpResponseDescriptor, TcpResponseRecord};
use crate::mockset::MockSet;
use crate::predicate::{Actual, Predicate};
use crate::resolver::{TcpBufferable, TcpFieldValue};
use crate::validate::{conform_pattern, exclusive, validate_delay_ms};

pub struct TcpMockBuilder {
    mocks: Arc<MockSet<TcpMockCell>>,
    parent_pin: Option<Arc<PinRecord>>,
    init_payload: Option<TcpFieldValue<Vec<u8>>>,
    req: Predicate,
    req_set: bool,
    request_pattern_raw: Option<String>,
    response: TcpResponseRecord,
    whole_response: Option<Arc<dyn Fn(&[u8]) -> TcpResponseRecord + Send + Sync>>,
    response_set: bool,
    body_delay_raw: Option<i64>,
}

impl TcpMockBuilder {
    pub(crate) fn new(mocks: Arc<MockSet<TcpMockCell>>) -> Self {
        Self {
            mocks,
            parent_pin: None,
            init_payload: None,
            req: Predicate::Absent,
            req_set: false,
            request_pattern_raw: None,
            response: TcpResponseRecord::default(),
            whole_response: None,
            response_set: false,
            body_delay_raw: None,
        }
    }

    pub(crate) fn child_of(mocks: Arc<MockSet<TcpMockCell>>, pin: Arc<PinRecord>) -> Self {
        let mut b = Self::new(mocks);
        b.parent_pin = Some(pin);
        b
    }

    // -- init (server-speaks-first) ----------------------------------------

    /// Children may not be init mocks (spec §4.5 "Pinning API") — calling
    /// this on a child builder is a declaration-time error surfaced at
    /// `create()`, not a panic here, so the whole chain can still be built
    /// fluently.
    pub fn init(mut self, payload: impl TcpBufferable) -> Self {
        self.init_payload = Some(payload.into_tcp_field());
        self
    }

    pub fn init_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.init_payload = Some(TcpFieldValue::callable(f));
        self
    }

    // -- request predicate ---------------------------------------------------

    pub fn request_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.req = Predicate::bytes(bytes.into());
        self.req_set = true;
        self
    }

    pub fn request_str(mut self, s: impl Into<String>) -> Self {
        self.req = Predicate::str(s.into());
        self.req_set = true;
        self
    }

    pub fn request_regex(mut self, re: Regex) -> Self {
        self.req = Predicate::regex(re);
        self.req_set = true;
        self
    }

    /// Accept a raw pattern, classified at `create()` as a `/.../ `-delimited
    /// regex or a literal byte match, via [`conform_pattern`] — the TCP
    /// counterpart to [`crate::http::HttpMockBuilder::pathname_pattern`].
    pub fn request_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.request_pattern_raw = Some(pattern.into());
        self.req_set = true;
        self
    }

    pub fn request_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Actual) -> bool + Send + Sync + 'static,
    {
        self.req = Predicate::callable(f);
        self.req_set = true;
        self
    }

    // -- response descriptor -------------------------------------------------

    pub fn response_body(mut self, body: impl TcpBufferable) -> Self {
        self.response.body = body.into_tcp_field();
        self.response_set = true;
        self
    }

    pub fn response_body_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.response.body = TcpFieldValue::callable(f);
        self.response_set = true;
        self
    }

    pub fn body_delay_ms(mut self, ms: i64) -> Self {
        self.body_delay_raw = Some(ms);
        self.response.body_delay = TcpFieldValue::literal(ms);
        self.response_set = true;
        self
    }

    pub fn destroy_socket(mut self, destroy: bool) -> Self {
        self.response.destroy_socket = TcpFieldValue::literal(destroy);
        self.response_set = true;
        self
    }

    pub fn response_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> TcpResponseRecord + Send + Sync + 'static,
    {
        self.whole_response = Some(Arc::new(f));
        self.response_set = true;
        self
    }

    /// Validate and register (spec §4.3, §4.6).
    pub fn create(mut self) -> Result<TcpMockHandle, NetmockError> {
        let mut issues = Vec::new();

        if let Some(ms) = self.body_delay_raw {
            if let Err(mut e) = validate_delay_ms("options.res.bodyDelay", ms) {
                issues.append(&mut e);
            }
        }

        if let Some(raw) = self.request_pattern_raw.take() {
            match conform_pattern("options.req", &raw) {
                Ok(p) => self.req = p,
                Err(mut e) => issues.append(&mut e),
            }
        }

        let has_reqres = self.req_set || self.response_set;
        if let Err(mut e) = exclusive(
            "options.init",
            self.init_payload.is_some(),
            "options.req",
            has_reqres,
        ) {
            issues.append(&mut e);
        }
        if self.parent_pin.is_some() && self.init_payload.is_some() {
            issues.push(
                "`options.init` a pinned child mock may not be an init mock".to_string(),
            );
        }

        if !issues.is_empty() {
            return Err(NetmockError::Validation(ValidationError::new(issues)));
        }

        let kind = match self.init_payload {
            Some(payload) => TcpMockKind::Init(payload),
            None => {
                let res = match self.whole_response {
                    Some(f) => TcpResponseDescriptor::Callable(f),
                    None => TcpResponseDescriptor::Record(self.response),
                };
                TcpMockKind::ReqRes { req: self.req, res }
            }
        };

        let id = self.mocks.next_id();
        let cell = match self.parent_pin {
            Some(pin) => Arc::new(TcpMockCell::new_tail(id, kind, pin)),
            None => Arc::new(TcpMockCell::new(id, kind)),
        };
        self.mocks.register(cell.clone());

        Ok(TcpMockHandle {
            mocks: self.mocks,
            cell,
        })
    }
}

/// A handle to a registered TCP mock; may itself spawn pinned children
/// (spec §6 `mockHandle.mock(options) -> mockHandle`, TCP only).
pub struct TcpMockHandle {
    mocks: Arc<MockSet<TcpMockCell>>,
    cell: Arc<TcpMockCell>,
}

impl TcpMockHandle {
    pub fn is_matched(&self) -> bool {
        self.cell.is_done()
    }

    pub fn assert_done(&self) -> Result<(), PendingMockError> {
        if self.cell.is_done() {
            Ok(())
        } else {
            Err(PendingMockError::new(vec![self.cell.display_form()]))
        }
    }

    /// Spawn a child mock sharing this mock's pinning group — if this is the
    /// first child, this mock is retroactively promoted to the group's head
    /// (spec §4.5 "Pinning API").
    pub fn mock(&self) -> TcpMockBuilder {
        let pin = self.cell.pin_record_or_init();
        TcpMockBuilder::child_of(self.mocks.clone(), pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::TcpServer;

    #[test]
    fn request_pattern_classifies_slash_delimited_string_as_regex() {
        let server = TcpServer::start(0).unwrap();
        let handle = server.mock().request_pattern("/^[A-Z]+$/").create().unwrap();
        match handle.cell.kind {
            TcpMockKind::ReqRes { ref req, .. } => assert!(matches!(req, Predicate::Regex(_))),
            _ => panic!("expected a req/res mock"),
        }
        server.teardown();
    }

    #[test]
    fn request_pattern_treats_undelimited_string_as_literal() {
        let server = TcpServer::start(0).unwrap();
        let handle = server.mock().request_pattern("HELLO").create().unwrap();
        match handle.cell.kind {
            TcpMockKind::ReqRes { ref req, .. } => {
                assert!(matches!(req, Predicate::Str(s) if s == "HELLO"))
            }
            _ => panic!("expected a req/res mock"),
        }
        server.teardown();
    }

    #[test]
    fn request_pattern_rejects_bad_regex_at_create_time() {
        let server = TcpServer::start(0).unwrap();
        let err = server
            .mock()
            .request_pattern("/(unterminated/")
            .create()
            .unwrap_err();
        assert!(matches!(err, NetmockError::Validation(_)));
        server.teardown();
    }
}
