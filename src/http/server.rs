//! The HTTP listener: acceptor loop, per-connection dispatch, matcher
//! invocation and response writing (spec §4.4, §4.7).
//!
//! Grounded directly in the teacher's `Server::try_start`/`handle_request`
//! (`server.rs` lines 70-198): an ephemeral bind, an accept loop on its own
//! thread, and a thread-per-request dispatch. What changes is everything
//! downstream of "a connection arrived" — the matcher now walks a
//! polymorphic predicate tree instead of a flat `PartialEq`, and the
//! listener is restartable/tearable-down rather than a process-lifetime
//! `lazy_static` singleton.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::diag::{server_debug, server_warn};
use crate::error::{NetmockError, PendingMockError};
use crate::mock::{HttpMockCell, MockCell};
use crate::mockset::MockSet;
use crate::request::{self, CanonicalRequest};
use crate::response::{not_found_body, write_response};

use super::builder::HttpMockBuilder;
use super::matcher::request_satisfies;

/// An HTTP mock server bound to a single port for its lifetime (spec §6
/// `httpServer({port?}) -> {port, mock, reset, teardown}`).
pub struct HttpServer {
    port: u16,
    pub(crate) mocks: Arc<MockSet<HttpMockCell>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    accept_thread: Option<JoinHandle<()>>,
    last_unmatched: Arc<Mutex<Option<CanonicalRequest>>>,
}

impl HttpServer {
    /// Bind and start accepting connections. `requested_port` of `0` asks
    /// the OS for an ephemeral port (spec §4.7).
    pub fn start(requested_port: u16) -> Result<Self, NetmockError> {
        let listener =
            TcpListener::bind(("127.0.0.1", requested_port)).map_err(NetmockError::Bind)?;
        listener.set_nonblocking(true).map_err(NetmockError::Bind)?;
        let port = listener.local_addr().map_err(NetmockError::Bind)?.port();

        let mocks = Arc::new(MockSet::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));
        let last_unmatched = Arc::new(Mutex::new(None));

        let accept_thread = {
            let mocks = mocks.clone();
            let shutdown = shutdown.clone();
            let connections = connections.clone();
            let last_unmatched = last_unmatched.clone();
            thread::spawn(move || {
                accept_loop(listener, mocks, shutdown, connections, last_unmatched, port)
            })
        };

        Ok(Self {
            port,
            mocks,
            shutdown,
            connections,
            accept_thread: Some(accept_thread),
            last_unmatched,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Begin declaring a new mock (spec §6 `listener.mock(options)`).
    pub fn mock(&self) -> HttpMockBuilder<'_> {
        HttpMockBuilder::new(self)
    }

    /// The most recent request that matched no mock, if any — useful for
    /// debugging a failed expectation (not part of the original surface;
    /// supplements it the way a printable pending-mock list already does).
    pub fn last_unmatched_request(&self) -> Option<CanonicalRequest> {
        self.last_unmatched.lock().unwrap().clone()
    }

    /// `reset(throwOnPending)` (spec §4.6).
    pub fn reset(&self, throw_on_pending: bool) -> Result<(), PendingMockError> {
        self.mocks.reset(throw_on_pending)
    }

    /// Stop accepting new connections, destroy any still-open ones, then
    /// join the accept thread (spec §4.6 `teardown()`).
    pub fn teardown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for stream in self.connections.lock().unwrap().drain(..) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    mocks: Arc<MockSet<HttpMockCell>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    last_unmatched: Arc<Mutex<Option<CanonicalRequest>>>,
    port: u16,
) {
    server_debug!("[127.0.0.1:{port}] http listener accepting");
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let _ = stream.set_nonblocking(false);
                connections.lock().unwrap().push(stream.try_clone().expect("clone accepted stream"));
                let mocks = mocks.clone();
                let last_unmatched = last_unmatched.clone();
                thread::spawn(move || handle_connection(stream, mocks, last_unmatched));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                server_warn!("accept failed: {e}");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
    server_debug!("[127.0.0.1:{port}] http listener stopped accepting");
}

/// One HTTP request per connection — this listener, like the teacher's,
/// does not keep connections alive across requests (spec is silent on
/// keep-alive; the software under test is expected to open one connection
/// per request, as is typical of HTTP client libraries under test).
fn handle_connection(
    mut stream: TcpStream,
    mocks: Arc<MockSet<HttpMockCell>>,
    last_unmatched: Arc<Mutex<Option<CanonicalRequest>>>,
) {
    let req = match request::read_request(&mut stream) {
        Ok(req) => req,
        Err(e) => {
            server_debug!("request read/parse failed: {e}");
            return;
        }
    };
    server_debug!("{} {}", req.method, req.raw_target);

    let snapshot = mocks.snapshot();
    let chosen = snapshot
        .iter()
        .find(|cell| !cell.is_done() && request_satisfies(&cell.request, &req));

    match chosen {
        Some(cell) if cell.mark_done() => {
            server_debug!("matched mock #{}", cell.id());
            let resolved = cell.response.resolve_record(&req, &req.body).resolve(&req, &req.body);
            let skip_body = req.method.eq_ignore_ascii_case("HEAD");
            if let Err(e) = write_response(&stream, req.http_version, &resolved, skip_body) {
                server_debug!("write failed (peer likely closed): {e}");
            }
        }
        _ => {
            server_debug!("no mock matched: {} {}", req.method, req.raw_target);
            *last_unmatched.lock().unwrap() = Some(req.clone());
            let body = not_found_body(&req.method, &req.raw_target, req.http_version);
            let resolved = crate::response::ResolvedResponse {
                status_code: 404,
                headers: vec![("content-type".to_string(), b"text/plain".to_vec())],
                body,
                header_delay: Duration::ZERO,
                body_delay: Duration::ZERO,
                destroy_socket: false,
            };
            let skip_body = req.method.eq_ignore_ascii_case("HEAD");
            if let Err(e) = write_response(&stream, req.http_version, &resolved, skip_body) {
                server_debug!("write failed (peer likely closed): {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as ClientStream;

    fn send_request(port: u16, raw: &str) -> String {
        let mut conn = ClientStream::connect(("127.0.0.1", port)).unwrap();
        conn.write_all(raw.as_bytes()).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut out = String::new();
        let _ = conn.read_to_string(&mut out);
        out
    }

    #[test]
    fn basic_match_returns_mocked_response() {
        crate::diag::init_test_tracing();
        let server = HttpServer::start(0).unwrap();
        server
            .mock()
            .method("POST")
            .pathname("/bloop")
            .status(200)
            .response_body("bloop")
            .create()
            .unwrap();

        let resp = send_request(
            server.port(),
            "POST /bloop HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 200"));
        assert!(resp.ends_with("bloop"));
        server.teardown();
    }

    #[test]
    fn no_match_yields_404_fallback() {
        let server = HttpServer::start(0).unwrap();
        let resp = send_request(
            server.port(),
            "GET /nope HTTP/1.1\r\nHost: x\r\n\r\n",
        );
        assert!(resp.starts_with("HTTP/1.1 404"));
        assert!(resp.contains("No matching mock was found for [GET /nope HTTP/1.1]"));
        server.teardown();
    }

    #[test]
    fn callable_fault_is_swallowed() {
        let server = HttpServer::start(0).unwrap();
        server
            .mock()
            .method("GET")
            .pathname("/boom")
            .response_body_fn(|_req, _body| panic!("boom"))
            .create()
            .unwrap();

        let resp = send_request(server.port(), "GET /boom HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(resp.starts_with("HTTP/1.1 200"));
        server.teardown();
    }

    /// Spec §4.4 step 4 orders the write as header-delay, then body-delay,
    /// then either the body or (if `destroySocket`) the abortive close — the
    /// reset must not be observed before `bodyDelay` has elapsed.
    #[test]
    fn destroy_socket_honors_body_delay_before_resetting() {
        let server = HttpServer::start(0).unwrap();
        server
            .mock()
            .method("GET")
            .pathname("/reset-later")
            .status(200)
            .body_delay_ms(150)
            .destroy_socket(true)
            .create()
            .unwrap();

        let mut conn =
            ClientStream::connect(("127.0.0.1", server.port())).unwrap();
        conn.write_all(b"GET /reset-later HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let start = std::time::Instant::now();
        let mut buf = [0u8; 16];
        let outcome = conn.read(&mut buf);
        let elapsed = start.elapsed();

        // Either a reset error or a clean 0-byte read is an acceptable
        // signal of the abortive close, depending on platform timing; what
        // matters is that it didn't happen before the delay elapsed.
        assert!(matches!(outcome, Err(_)) || matches!(outcome, Ok(0)));
        assert!(elapsed >= Duration::from_millis(120));

        server.teardown();
    }
}
