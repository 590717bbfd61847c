//! HTTP response descriptors and the byte-level assembly of the wire
//! response (spec §3 "Response descriptor (HTTP)", §4.4 step 4).
//!
//! The assembly logic (status line, headers, body, `Transfer-Encoding`
//! fallback for an unknown-length body) is grounded directly in the
//! teacher's `respond_bytes` (`server.rs` lines 213-259).

use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::request::CanonicalRequest;
use crate::resolver::{self, FieldValue};

/// Either the whole descriptor is computed from the request, or it's a
/// record of independently-resolvable fields (spec §3).
pub enum ResponseDescriptor {
    Callable(Arc<dyn Fn(&CanonicalRequest, &[u8]) -> ResponseRecord + Send + Sync>),
    Record(ResponseRecord),
}

impl Default for ResponseDescriptor {
    fn default() -> Self {
        ResponseDescriptor::Record(ResponseRecord::default())
    }
}

impl ResponseDescriptor {
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&CanonicalRequest, &[u8]) -> ResponseRecord + Send + Sync + 'static,
    {
        ResponseDescriptor::Callable(Arc::new(f))
    }

    /// Resolve the whole descriptor down to a record, swallowing a
    /// panicking top-level callable the same way every other resolver call
    /// does (spec §4.2, §7.2).
    pub fn resolve_record(&self, req: &CanonicalRequest, body: &[u8]) -> ResponseRecord {
        match self {
            ResponseDescriptor::Record(r) => r.clone(),
            ResponseDescriptor::Callable(f) => {
                let f = f.clone();
                let req = req.clone();
                let body = body.to_vec();
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&req, &body))) {
                    Ok(r) => r,
                    Err(_) => {
                        crate::diag::server_warn!(
                            "response descriptor callable panicked; responding with defaults"
                        );
                        ResponseRecord::default()
                    }
                }
            }
        }
    }
}

/// `{body, statusCode, headers, headerDelay, bodyDelay, destroySocket}`
/// (spec §3).
#[derive(Clone)]
pub struct ResponseRecord {
    pub body: FieldValue<Vec<u8>>,
    pub status_code: FieldValue<i64>,
    pub headers: Vec<(String, FieldValue<Vec<u8>>)>,
    pub header_delay: FieldValue<i64>,
    pub body_delay: FieldValue<i64>,
    pub destroy_socket: FieldValue<bool>,
}

impl Default for ResponseRecord {
    fn default() -> Self {
        Self {
            body: FieldValue::Literal(Vec::new()),
            status_code: FieldValue::Literal(200),
            headers: Vec::new(),
            header_delay: FieldValue::Literal(0),
            body_delay: FieldValue::Literal(0),
            destroy_socket: FieldValue::Literal(false),
        }
    }
}

/// The fully-resolved, ready-to-write form of a [`ResponseRecord`].
pub struct ResolvedResponse {
    pub status_code: i64,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    pub header_delay: Duration,
    pub body_delay: Duration,
    pub destroy_socket: bool,
}

impl ResponseRecord {
    pub fn resolve(&self, req: &CanonicalRequest, body: &[u8]) -> ResolvedResponse {
        ResolvedResponse {
            status_code: resolver::to_int(&self.status_code, req, body, 200),
            headers: resolver::to_headers(&self.headers, req, body),
            body: resolver::to_bytes(&self.body, req, body),
            header_delay: Duration::from_millis(
                resolver::to_int(&self.header_delay, req, body, 0).max(0) as u64,
            ),
            body_delay: Duration::from_millis(
                resolver::to_int(&self.body_delay, req, body, 0).max(0) as u64,
            ),
            destroy_socket: resolver::to_bool(&self.destroy_socket, req, body),
        }
    }
}

fn status_reason(code: i64) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Write `resolved` to `stream`, honoring `headerDelay` then `bodyDelay`
/// (spec §4.4 step 4) and, if `destroySocket` is set, aborting the
/// connection instead of completing the response (spec §9, "observed by the
/// peer as a reset").
pub fn write_response(
    mut stream: &TcpStream,
    version: (u8, u8),
    resolved: &ResolvedResponse,
    skip_body: bool,
) -> io::Result<()> {
    if !resolved.header_delay.is_zero() {
        std::thread::sleep(resolved.header_delay);
    }

    let mut head = Vec::new();
    write!(
        head,
        "HTTP/{}.{} {} {}\r\n",
        version.0,
        version.1,
        resolved.status_code,
        status_reason(resolved.status_code)
    )?;

    let has_content_length = resolved
        .headers
        .iter()
        .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
    for (name, value) in &resolved.headers {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value);
        head.extend_from_slice(b"\r\n");
    }
    if !has_content_length {
        write!(head, "content-length: {}\r\n", resolved.body.len())?;
    }
    head.extend_from_slice(b"\r\n");

    stream.write_all(&head)?;
    stream.flush()?;

    if !resolved.body_delay.is_zero() {
        std::thread::sleep(resolved.body_delay);
    }

    if resolved.destroy_socket {
        abort_connection(stream);
        return Ok(());
    }

    if !skip_body {
        stream.write_all(&resolved.body)?;
    }
    stream.flush()
}

/// An abortive close (`RST`, not `FIN`) so the peer observes `ECONNRESET`
/// rather than a clean EOF (spec §9).
pub fn abort_connection(stream: &TcpStream) {
    let _ = stream.set_linger(Some(Duration::from_secs(0)));
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

pub fn not_found_body(method: &str, raw_target: &str, version: (u8, u8)) -> Vec<u8> {
    format!(
        "No matching mock was found for [{} {} HTTP/{}.{}]",
        method, raw_target, version.0, version.1
    )
    .into_bytes()
}
