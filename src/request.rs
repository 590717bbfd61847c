//! The canonical, parsed shape every incoming HTTP request is reduced to
//! before it reaches the matcher (spec §4.4 step 2).

use std::fmt;
use std::io::{self, BufReader, Read};
use std::net::TcpStream;

use crate::error::NetmockError;

/// A header's value(s) as observed on the wire: most headers appear once,
/// but a name may legally repeat (`Set-Cookie`, etc.).
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Single(String),
    Repeated(Vec<String>),
}

impl HeaderValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(v) => vec![v.as_str()],
            HeaderValue::Repeated(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// An ordered multimap from header name to value(s), preserving the wire
/// case of each name (spec §4.4 "Names are compared case-sensitive, as
/// observed on the wire", §9 Open Questions).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<(String, HeaderValue)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header as observed on the wire, folding into a `Repeated`
    /// value if the exact same (case-sensitive) name already appeared.
    pub fn push(&mut self, name: String, value: String) {
        if let Some((_, existing)) = self.0.iter_mut().find(|(n, _)| n == &name) {
            match existing {
                HeaderValue::Single(v) => {
                    *existing = HeaderValue::Repeated(vec![v.clone(), value]);
                }
                HeaderValue::Repeated(vs) => vs.push(value),
            }
        } else {
            self.0.push((name, HeaderValue::Single(value)));
        }
    }

    /// Case-sensitive lookup by exact wire-observed name.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// A fully-buffered, parsed HTTP request (spec §3 "Mock (HTTP)" counterpart;
/// §4.4 step 2's "canonical shape").
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub method: String,
    pub pathname: String,
    /// The literal query string, leading `?` included when present, empty
    /// otherwise (spec §4.4 step 2).
    pub query: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub http_version: (u8, u8),
    /// The raw request-target as it appeared on the request line, used
    /// verbatim in the 404 fallback message (spec §6).
    pub raw_target: String,
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} HTTP/{}.{}",
            self.method, self.raw_target, self.http_version.0, self.http_version.1
        )?;
        for (name, value) in self.headers.iter() {
            for v in value.values() {
                write!(f, "\n{name}: {v}")?;
            }
        }
        if !self.body.is_empty() {
            write!(f, "\n{}", String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

const MAX_HEADERS: usize = 128;

/// Read and parse one HTTP/1.x request off `stream` (spec §4.4 steps 1-2).
/// Uses `httparse` for the request line + header section (the "proven
/// implementation" spec §1 defers to), then reads the body per
/// `Content-Length` (chunked transfer-encoded request bodies are out of
/// scope — this is a mock server's *inbound* side, which in practice is
/// driven by the software under test's HTTP client, not a browser).
pub fn read_request(stream: &mut TcpStream) -> io::Result<CanonicalRequest> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(4096);
    let mut head_end = None;

    let mut chunk = [0u8; 1024];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
            }
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                head_end = Some(len);
                break;
            }
            Ok(httparse::Status::Partial) => continue,
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        }
    }

    let head_end = head_end.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "incomplete request head")
    })?;

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_storage);
    parsed
        .parse(&buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let method = parsed.method.unwrap_or("GET").to_ascii_uppercase();
    let raw_target = parsed.path.unwrap_or("/").to_string();
    let version_minor = parsed.version.unwrap_or(1);

    let (pathname, query) = split_target(&raw_target);

    let mut headers = Headers::new();
    let mut content_length: usize = 0;
    for h in parsed.headers.iter() {
        let name = h.name.to_string();
        let value = String::from_utf8_lossy(h.value).into_owned();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        headers.push(name, value);
    }

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(CanonicalRequest {
        method,
        pathname,
        query,
        headers,
        body,
        http_version: (1, version_minor),
        raw_target,
    })
}

fn split_target(target: &str) -> (String, String) {
    match target.find('?') {
        Some(idx) => (target[..idx].to_string(), target[idx..].to_string()),
        None => (target.to_string(), String::new()),
    }
}

pub(crate) fn io_to_netmock(e: io::Error) -> NetmockError {
    NetmockError::Bind(e)
}
