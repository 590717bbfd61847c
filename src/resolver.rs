//! The resolver: turns polymorphic response descriptors into concrete bytes,
//! ints and bools, with defensive defaults (spec §4.2).
//!
//! Unlike the JS original, each field here is statically typed (`FieldValue
//! <Vec<u8>>`, `FieldValue<i64>`, ...), so the "result has the wrong runtime
//! type" branch of the original `toBytes`/`toInt`/`toBool` simply cannot
//! happen — the compiler enforces it at the call site. What does carry over
//! verbatim is "never propagate a fault from a user callable": every
//! resolution is wrapped in `catch_unwind` and falls back to the type's
//! default on panic, exactly as spec §4.2 and §7.2 require.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::diag::server_warn;
use crate::request::CanonicalRequest;

/// A value that is either given outright, or computed from the matched
/// request and its body at resolution time.
#[derive(Clone)]
pub enum FieldValue<T> {
    Literal(T),
    Callable(Arc<dyn Fn(&CanonicalRequest, &[u8]) -> T + Send + Sync>),
}

impl<T: Clone> FieldValue<T> {
    pub fn literal(v: T) -> Self {
        FieldValue::Literal(v)
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&CanonicalRequest, &[u8]) -> T + Send + Sync + 'static,
    {
        FieldValue::Callable(Arc::new(f))
    }
}

impl<T> std::fmt::Debug for FieldValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Literal(_) => write!(f, "Literal(..)"),
            FieldValue::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

/// Resolve a field, falling back to `default` if a callable panics.
///
/// This is the single point through which every descriptor field flows, so
/// that "a buggy descriptor must not crash the server" (spec §4.2) is
/// enforced once, here, rather than at every call site.
pub fn resolve<T: Clone>(
    value: &FieldValue<T>,
    req: &CanonicalRequest,
    body: &[u8],
    default: T,
) -> T {
    match value {
        FieldValue::Literal(v) => v.clone(),
        FieldValue::Callable(f) => {
            let f = f.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| f(req, body))) {
                Ok(v) => v,
                Err(_) => {
                    server_warn!("response descriptor callable panicked; using default");
                    default
                }
            }
        }
    }
}

/// `toBytes`: string literals are UTF-8 encoded by construction (see the
/// `From<&str>` impl on [`Bufferable`]); this just threads the panic-safe
/// default through.
pub fn to_bytes(value: &FieldValue<Vec<u8>>, req: &CanonicalRequest, body: &[u8]) -> Vec<u8> {
    resolve(value, req, body, Vec::new())
}

/// `toInt`: callers pass the spec-mandated default (0 for delays, 200 for
/// `statusCode`).
pub fn to_int(value: &FieldValue<i64>, req: &CanonicalRequest, body: &[u8], default: i64) -> i64 {
    resolve(value, req, body, default)
}

/// `toBool`: default is always `false`.
pub fn to_bool(value: &FieldValue<bool>, req: &CanonicalRequest, body: &[u8]) -> bool {
    resolve(value, req, body, false)
}

/// `toHeaders`: resolve every `(name, value)` pair, applying `toBytes` to
/// each value. A panicking callable drops that single header rather than the
/// whole response (still "never propagate").
pub fn to_headers(
    headers: &[(String, FieldValue<Vec<u8>>)],
    req: &CanonicalRequest,
    body: &[u8],
) -> Vec<(String, Vec<u8>)> {
    headers
        .iter()
        .map(|(name, v)| (name.clone(), to_bytes(v, req, body)))
        .collect()
}

/// The TCP-flavored counterpart of [`FieldValue`]: TCP response/init
/// callables are only ever given the matched receive buffer, not a
/// [`CanonicalRequest`] (there is no HTTP request to hand them — spec §3
/// "Response descriptor (TCP)").
#[derive(Clone)]
pub enum TcpFieldValue<T> {
    Literal(T),
    Callable(Arc<dyn Fn(&[u8]) -> T + Send + Sync>),
}

impl<T: Clone> TcpFieldValue<T> {
    pub fn literal(v: T) -> Self {
        TcpFieldValue::Literal(v)
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[u8]) -> T + Send + Sync + 'static,
    {
        TcpFieldValue::Callable(Arc::new(f))
    }
}

impl<T> std::fmt::Debug for TcpFieldValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpFieldValue::Literal(_) => write!(f, "Literal(..)"),
            TcpFieldValue::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

/// Resolve a TCP-flavored field, falling back to `default` if a callable
/// panics (spec §4.2, §7.2 — same discipline as [`resolve`], different
/// argument shape).
pub fn resolve_tcp<T: Clone>(value: &TcpFieldValue<T>, matched_buffer: &[u8], default: T) -> T {
    match value {
        TcpFieldValue::Literal(v) => v.clone(),
        TcpFieldValue::Callable(f) => {
            let f = f.clone();
            let buf = matched_buffer.to_vec();
            match panic::catch_unwind(AssertUnwindSafe(|| f(&buf))) {
                Ok(v) => v,
                Err(_) => {
                    server_warn!("tcp response descriptor callable panicked; using default");
                    default
                }
            }
        }
    }
}

pub fn tcp_to_bytes(value: &TcpFieldValue<Vec<u8>>, matched_buffer: &[u8]) -> Vec<u8> {
    resolve_tcp(value, matched_buffer, Vec::new())
}

pub fn tcp_to_int(value: &TcpFieldValue<i64>, matched_buffer: &[u8], default: i64) -> i64 {
    resolve_tcp(value, matched_buffer, default)
}

pub fn tcp_to_bool(value: &TcpFieldValue<bool>, matched_buffer: &[u8]) -> bool {
    resolve_tcp(value, matched_buffer, false)
}

/// Any value that can be coerced to bytes: a string, a byte buffer, or a
/// callable returning either (spec GLOSSARY "Bufferable").
pub trait Bufferable {
    fn into_field(self) -> FieldValue<Vec<u8>>;
}

/// The TCP-flavored counterpart of [`Bufferable`].
pub trait TcpBufferable {
    fn into_tcp_field(self) -> TcpFieldValue<Vec<u8>>;
}

impl TcpBufferable for &str {
    fn into_tcp_field(self) -> TcpFieldValue<Vec<u8>> {
        TcpFieldValue::Literal(self.as_bytes().to_vec())
    }
}

impl TcpBufferable for String {
    fn into_tcp_field(self) -> TcpFieldValue<Vec<u8>> {
        TcpFieldValue::Literal(self.into_bytes())
    }
}

impl TcpBufferable for Vec<u8> {
    fn into_tcp_field(self) -> TcpFieldValue<Vec<u8>> {
        TcpFieldValue::Literal(self)
    }
}

impl TcpBufferable for TcpFieldValue<Vec<u8>> {
    fn into_tcp_field(self) -> TcpFieldValue<Vec<u8>> {
        self
    }
}

impl Bufferable for &str {
    fn into_field(self) -> FieldValue<Vec<u8>> {
        FieldValue::Literal(self.as_bytes().to_vec())
    }
}

impl Bufferable for String {
    fn into_field(self) -> FieldValue<Vec<u8>> {
        FieldValue::Literal(self.into_bytes())
    }
}

impl Bufferable for Vec<u8> {
    fn into_field(self) -> FieldValue<Vec<u8>> {
        FieldValue::Literal(self)
    }
}

impl Bufferable for FieldValue<Vec<u8>> {
    fn into_field(self) -> FieldValue<Vec<u8>> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CanonicalRequest, Headers};

    fn req() -> CanonicalRequest {
        CanonicalRequest {
            method: "GET".to_string(),
            pathname: "/".to_string(),
            query: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            http_version: (1, 1),
            raw_target: "/".to_string(),
        }
    }

    #[test]
    fn literal_passes_through() {
        let v = FieldValue::literal(vec![1, 2, 3]);
        assert_eq!(to_bytes(&v, &req(), b""), vec![1, 2, 3]);
    }

    #[test]
    fn panicking_callable_falls_back_to_default() {
        let v: FieldValue<i64> = FieldValue::callable(|_req, _body| panic!("boom"));
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = to_int(&v, &req(), b"", 200);
        std::panic::set_hook(prev);
        assert_eq!(result, 200);
    }

    #[test]
    fn healthy_callable_runs_normally() {
        let v = FieldValue::callable(|r: &CanonicalRequest, _body: &[u8]| r.method.clone().into_bytes());
        assert_eq!(to_bytes(&v, &req(), b""), b"GET".to_vec());
    }

    #[test]
    fn to_headers_resolves_every_pair_independently() {
        let headers = vec![
            ("x-a".to_string(), FieldValue::literal(b"1".to_vec())),
            ("x-b".to_string(), FieldValue::callable(|_, _| b"2".to_vec())),
        ];
        let resolved = to_headers(&headers, &req(), b"");
        assert_eq!(resolved, vec![
            ("x-a".to_string(), b"1".to_vec()),
            ("x-b".to_string(), b"2".to_vec()),
        ]);
    }

    #[test]
    fn tcp_panicking_callable_falls_back_to_empty_bytes() {
        let v: TcpFieldValue<Vec<u8>> = TcpFieldValue::callable(|_buf| panic!("boom"));
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = tcp_to_bytes(&v, b"abcd");
        std::panic::set_hook(prev);
        assert_eq!(result, Vec::<u8>::new());
    }
}
