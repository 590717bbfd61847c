//! The TCP listener: acceptor loop plus per-connection buffering and
//! matching (spec §4.5, §4.7).
//!
//! The accept/teardown shape mirrors [`crate::http::server::HttpServer`]
//! (itself grounded in the teacher's `Server::try_start`); what's new here —
//! disabling Nagle's algorithm, writing an init payload before the first
//! read, and feeding each arriving chunk through [`super::matcher`] — has no
//! teacher analogue and is built directly from spec §4.5.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::diag::{server_debug, server_warn};
use crate::error::{NetmockError, PendingMockError};
use crate::mock::TcpMockCell;
use crate::mockset::MockSet;
use crate::response::abort_connection;

use super::builder::TcpMockBuilder;
use super::matcher::TcpConnection;

pub struct TcpServer {
    port: u16,
    pub(crate) mocks: Arc<MockSet<TcpMockCell>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl TcpServer {
    pub fn start(requested_port: u16) -> Result<Self, NetmockError> {
        let listener =
            TcpListener::bind(("127.0.0.1", requested_port)).map_err(NetmockError::Bind)?;
        listener.set_nonblocking(true).map_err(NetmockError::Bind)?;
        let port = listener.local_addr().map_err(NetmockError::Bind)?.port();

        let mocks = Arc::new(MockSet::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));
        let conn_ids = Arc::new(AtomicU64::new(0));

        let accept_thread = {
            let mocks = mocks.clone();
            let shutdown = shutdown.clone();
            let connections = connections.clone();
            thread::spawn(move || accept_loop(listener, mocks, shutdown, connections, conn_ids, port))
        };

        Ok(Self {
            port,
            mocks,
            shutdown,
            connections,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn mock(&self) -> TcpMockBuilder {
        TcpMockBuilder::new(self.mocks.clone())
    }

    pub fn reset(&self, throw_on_pending: bool) -> Result<(), PendingMockError> {
        self.mocks.reset(throw_on_pending)
    }

    pub fn teardown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for stream in self.connections.lock().unwrap().drain(..) {
            abort_connection(&stream);
        }
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    mocks: Arc<MockSet<TcpMockCell>>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    conn_ids: Arc<AtomicU64>,
    port: u16,
) {
    server_debug!("[127.0.0.1:{port}] tcp listener accepting");
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let _ = stream.set_nonblocking(false);
                // Small, latency-sensitive writes (init payloads, short
                // responses) must be observable immediately (spec §4.7).
                if let Err(e) = stream.set_nodelay(true) {
                    server_warn!("failed to disable Nagle's algorithm: {e}");
                }
                connections
                    .lock()
                    .unwrap()
                    .push(stream.try_clone().expect("clone accepted stream"));
                let id = conn_ids.fetch_add(1, Ordering::SeqCst);
                let mocks = mocks.clone();
                thread::spawn(move || handle_connection(stream, id, mocks));
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
    server_debug!("[127.0.0.1:{port}] tcp listener stopped accepting");
}

fn handle_connection(mut stream: TcpStream, conn_id: u64, mocks: Arc<MockSet<TcpMockCell>>) {
    server_debug!("tcp conn {conn_id} established");

    if let Some((cell, payload)) = super::matcher::try_init(&mocks.snapshot(), conn_id) {
        let _ = cell; // init mock already marked matched by try_init
        if let Err(e) = stream.write_all(&payload) {
            server_debug!("tcp conn {conn_id}: init write failed: {e}");
            return;
        }
        if let Err(e) = stream.flush() {
            server_debug!("tcp conn {conn_id}: init flush failed: {e}");
            return;
        }
    }

    let mut conn = TcpConnection::new(conn_id);
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => {
                server_debug!("tcp conn {conn_id}: read failed: {e}");
                break;
            }
        };

        let Some((cell, resolved)) = conn.on_data(&chunk[..n], &mocks.snapshot()) else {
            continue;
        };
        let _ = cell;

        if !resolved.body_delay.is_zero() {
            thread::sleep(resolved.body_delay);
        }

        if resolved.destroy_socket {
            abort_connection(&stream);
            break;
        }

        if let Err(e) = stream.write_all(&resolved.body) {
            server_debug!("tcp conn {conn_id}: write failed: {e}");
            break;
        }
        if let Err(e) = stream.flush() {
            server_debug!("tcp conn {conn_id}: flush failed: {e}");
            break;
        }
    }

    server_debug!("tcp conn {conn_id} closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn init_mock_writes_on_connect() {
        crate::diag::init_test_tracing();
        let server = TcpServer::start(0).unwrap();
        server.mock().init("hello").create().unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        server.teardown();
    }

    #[test]
    fn pinned_tail_only_matches_its_own_connection() {
        let server = TcpServer::start(0).unwrap();
        let head = server.mock().init("a").create().unwrap();
        head.mock().request_str("b").response_body("b-reply").create().unwrap();

        let other_head = server.mock().init("d").create().unwrap();
        other_head
            .mock()
            .request_str("e")
            .response_body("e-reply")
            .create()
            .unwrap();

        let mut conn_a = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        conn_a.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 16];
        let n = conn_a.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"a");

        let mut conn_b = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
        conn_b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let n = conn_b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"d");

        // "e" is conn_b's head's tail; writing it on conn_a must not match.
        conn_a.write_all(b"e").unwrap();
        conn_a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut probe = [0u8; 16];
        let outcome = conn_a.read(&mut probe);
        assert!(matches!(outcome, Err(_)) || matches!(outcome, Ok(0)));

        // conn_b's own tail does match there.
        conn_b.write_all(b"e").unwrap();
        conn_b.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let n = conn_b.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"e-reply");

        server.teardown();
    }
}
