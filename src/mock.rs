//! Mock declarations: the HTTP and TCP flavors, their shared pending/matched
//! lifecycle, and TCP connection pinning (spec §3, §4.5, §4.6).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::predicate::Predicate;
use crate::request::CanonicalRequest;
use crate::resolver::{FieldValue, TcpFieldValue};
use crate::response::ResponseDescriptor;

/// Anything the mock set can track the pending/matched lifecycle of and
/// print in a `PendingMockError` (spec §6 "Mock printable form").
pub trait MockCell: Send + Sync {
    fn is_done(&self) -> bool;
    /// Returns `true` the first time it's called on this cell (the
    /// pending→matched transition), `false` on every call after — so a mock
    /// is never consumed twice even under concurrent matchers (spec §8
    /// "number of transitions pending→matched is 0 or 1").
    fn mark_done(&self) -> bool;
    fn display_form(&self) -> String;
    fn id(&self) -> u64;
}

fn describe_predicate(p: &Predicate) -> Option<String> {
    match p {
        Predicate::Absent => None,
        Predicate::Str(s) => Some(s.clone()),
        Predicate::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Predicate::Regex(re) => Some(format!("/{}/", re.as_str())),
        Predicate::Callable(_) => Some("<callable>".to_string()),
        Predicate::Map(m) => Some(format!(
            "{{{}}}",
            m.iter()
                .map(|(k, v)| format!("{k}: {}", describe_predicate(v).unwrap_or_default()))
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Predicate::Seq(s) => Some(format!(
            "[{}]",
            s.iter()
                .map(|v| describe_predicate(v).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

fn describe_field<T>(field: &FieldValue<T>, fmt: impl Fn(&T) -> String) -> String {
    match field {
        FieldValue::Literal(v) => fmt(v),
        FieldValue::Callable(_) => "<callable>".to_string(),
    }
}

fn describe_bytes_field(field: &FieldValue<Vec<u8>>) -> String {
    describe_field(field, |b| String::from_utf8_lossy(b).into_owned())
}

fn describe_tcp_field<T>(field: &TcpFieldValue<T>, fmt: impl Fn(&T) -> String) -> String {
    match field {
        TcpFieldValue::Literal(v) => fmt(v),
        TcpFieldValue::Callable(_) => "<callable>".to_string(),
    }
}

fn describe_tcp_bytes_field(field: &TcpFieldValue<Vec<u8>>) -> String {
    describe_tcp_field(field, |b| String::from_utf8_lossy(b).into_owned())
}

// ---------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------

/// The request predicate for an HTTP mock (spec §3 "Request predicate
/// (HTTP)").
pub enum HttpRequestPredicate {
    /// `(request) -> bool`.
    Whole(Arc<dyn Fn(&CanonicalRequest) -> bool + Send + Sync>),
    Fields(HttpFieldPredicates),
}

impl Default for HttpRequestPredicate {
    fn default() -> Self {
        HttpRequestPredicate::Fields(HttpFieldPredicates::default())
    }
}

#[derive(Default)]
pub struct HttpFieldPredicates {
    pub method: Predicate,
    pub pathname: Predicate,
    pub query: Predicate,
    /// Keyed by the exact wire-case header name (spec §4.4, "Names are
    /// compared case-sensitive, as observed on the wire"). A
    /// `Predicate::Seq` value matches a repeated header's values
    /// element-wise, with an exact count requirement enforced by the
    /// matcher, not the generic comparator (spec §8 Boundary behaviors).
    pub headers: BTreeMap<String, Predicate>,
    pub body: Predicate,
}

pub struct HttpMockCell {
    id: u64,
    pub request: HttpRequestPredicate,
    pub response: ResponseDescriptor,
    done: AtomicBool,
}

impl HttpMockCell {
    pub fn new(id: u64, request: HttpRequestPredicate, response: ResponseDescriptor) -> Self {
        Self {
            id,
            request,
            response,
            done: AtomicBool::new(false),
        }
    }
}

impl MockCell for HttpMockCell {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn mark_done(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn display_form(&self) -> String {
        format!("{self}")
    }

    fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for HttpMockCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        match &self.request {
            HttpRequestPredicate::Whole(_) => fields.push("req=<callable>".to_string()),
            HttpRequestPredicate::Fields(p) => {
                if let Some(v) = describe_predicate(&p.method) {
                    fields.push(format!("method={v}"));
                }
                if let Some(v) = describe_predicate(&p.pathname) {
                    fields.push(format!("pathname={v}"));
                }
                if let Some(v) = describe_predicate(&p.query) {
                    fields.push(format!("query={v}"));
                }
                for (name, pred) in &p.headers {
                    if let Some(v) = describe_predicate(pred) {
                        fields.push(format!("headers[{name}]={v}"));
                    }
                }
                if let Some(v) = describe_predicate(&p.body) {
                    fields.push(format!("body={v}"));
                }
            }
        }
        match &self.response {
            ResponseDescriptor::Callable(_) => fields.push("res=<callable>".to_string()),
            ResponseDescriptor::Record(r) => {
                fields.push(format!("status={}", describe_field(&r.status_code, i64::to_string)));
                let body = describe_bytes_field(&r.body);
                if !body.is_empty() {
                    fields.push(format!("body={body}"));
                }
            }
        }
        write!(f, "HTTP{{{}}}", fields.join(", "))
    }
}

// ---------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------

/// A shared "group record" binding one or more TCP mocks to a single
/// connection (spec §3 "Pinning group", §9 "Pinning graph"). The head writes
/// the connection identity into it exactly once; tail mocks only ever read
/// it.
pub struct PinRecord {
    connection: Mutex<Option<u64>>,
}

impl PinRecord {
    pub fn new() -> Self {
        Self {
            connection: Mutex::new(None),
        }
    }

    /// Bind this group to `conn` if unbound; idempotent if already bound to
    /// the same connection (a head is only ever matched once, but this
    /// keeps the operation safe to call defensively).
    pub fn bind(&self, conn: u64) {
        let mut guard = self.connection.lock().unwrap();
        if guard.is_none() {
            *guard = Some(conn);
        }
    }

    pub fn bound_to(&self, conn: u64) -> bool {
        *self.connection.lock().unwrap() == Some(conn)
    }
}

impl Default for PinRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// `{body, bodyDelay, destroySocket}`, the TCP-flavored response record
/// (spec §3 "Response descriptor (TCP)").
#[derive(Clone)]
pub struct TcpResponseRecord {
    pub body: TcpFieldValue<Vec<u8>>,
    pub body_delay: TcpFieldValue<i64>,
    pub destroy_socket: TcpFieldValue<bool>,
}

impl Default for TcpResponseRecord {
    fn default() -> Self {
        Self {
            body: TcpFieldValue::Literal(Vec::new()),
            body_delay: TcpFieldValue::Literal(0),
            destroy_socket: TcpFieldValue::Literal(false),
        }
    }
}

pub enum TcpResponseDescriptor {
    Callable(Arc<dyn Fn(&[u8]) -> TcpResponseRecord + Send + Sync>),
    Record(TcpResponseRecord),
}

impl TcpResponseDescriptor {
    pub fn resolve_record(&self, matched_buffer: &[u8]) -> TcpResponseRecord {
        match self {
            TcpResponseDescriptor::Record(r) => r.clone(),
            TcpResponseDescriptor::Callable(f) => {
                let f = f.clone();
                let buf = matched_buffer.to_vec();
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&buf))) {
                    Ok(r) => r,
                    Err(_) => {
                        crate::diag::server_warn!(
                            "tcp response descriptor callable panicked; responding with defaults"
                        );
                        TcpResponseRecord::default()
                    }
                }
            }
        }
    }
}

/// Exactly one of `init` or `(req, res)` may be populated (spec §3 invariant
/// "A TCP mock is either an init mock or a req/res mock, never both").
pub enum TcpMockKind {
    Init(TcpFieldValue<Vec<u8>>),
    ReqRes {
        req: Predicate,
        res: TcpResponseDescriptor,
    },
}

impl TcpMockKind {
    pub fn is_init(&self) -> bool {
        matches!(self, TcpMockKind::Init(_))
    }
}

pub struct TcpMockCell {
    id: u64,
    pub kind: TcpMockKind,
    /// `None` for a standalone mock (eligible on any connection, binds
    /// nothing). `Some(record)` for a member of a pinning group; whether
    /// this cell is the head or a tail is tracked separately by
    /// `is_head`.
    pin: Mutex<Option<Arc<PinRecord>>>,
    is_head: AtomicBool,
    done: AtomicBool,
}

impl TcpMockCell {
    pub fn new(id: u64, kind: TcpMockKind) -> Self {
        Self {
            id,
            kind,
            pin: Mutex::new(None),
            is_head: AtomicBool::new(true),
            done: AtomicBool::new(false),
        }
    }

    pub fn pin_record(&self) -> Option<Arc<PinRecord>> {
        self.pin.lock().unwrap().clone()
    }

    pub fn is_head(&self) -> bool {
        self.is_head.load(Ordering::SeqCst)
    }

    /// Lazily create (if absent) and return this cell's pinning record,
    /// marking it the head of its group. Used when a [`crate::tcp::TcpMockHandle`]
    /// spawns its first pinned child (spec §4.5 "Pinning API").
    pub fn pin_record_or_init(&self) -> Arc<PinRecord> {
        let mut guard = self.pin.lock().unwrap();
        if guard.is_none() {
            *guard = Some(Arc::new(PinRecord::new()));
        }
        guard.clone().unwrap()
    }

    /// Construct a tail cell sharing `pin`'s group.
    pub fn new_tail(id: u64, kind: TcpMockKind, pin: Arc<PinRecord>) -> Self {
        Self {
            id,
            kind,
            pin: Mutex::new(Some(pin)),
            is_head: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }
}

impl MockCell for TcpMockCell {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn mark_done(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn display_form(&self) -> String {
        format!("{self}")
    }

    fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for TcpMockCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        match &self.kind {
            TcpMockKind::Init(payload) => {
                fields.push(format!("init={}", describe_tcp_bytes_field(payload)));
            }
            TcpMockKind::ReqRes { req, res } => {
                if let Some(v) = describe_predicate(req) {
                    fields.push(format!("req={v}"));
                }
                match res {
                    TcpResponseDescriptor::Callable(_) => fields.push("res=<callable>".to_string()),
                    TcpResponseDescriptor::Record(r) => {
                        let body = describe_tcp_bytes_field(&r.body);
                        if !body.is_empty() {
                            fields.push(format!("res={body}"));
                        }
                    }
                }
            }
        }
        if !self.is_head() && self.pin.lock().unwrap().is_some() {
            fields.push("pinned=tail".to_string());
        } else if self.pin.lock().unwrap().is_some() {
            fields.push("pinned=head".to_string());
        }
        write!(f, "TCP{{{}}}", fields.join(", "))
    }
}
