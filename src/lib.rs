//! A programmable network mock server for HTTP and raw TCP.
//!
//! Tests register request/response pairs ("mocks") against an
//! [`http::HttpServer`] or [`tcp::TcpServer`], point the software under test
//! at its ephemeral port, drive it, then call `reset`/`teardown`. Unlike
//! in-process interception, this binds a real listening socket, so the
//! software under test traverses its actual networking stack.
//!
//! ```no_run
//! use netmock::HttpServer;
//!
//! let server = HttpServer::start(0).unwrap();
//! let mock = server
//!     .mock()
//!     .method("GET")
//!     .pathname("/health")
//!     .status(200)
//!     .response_body("ok")
//!     .create()
//!     .unwrap();
//!
//! // drive the software under test against `server.url()` ...
//!
//! mock.assert_done().unwrap();
//! server.teardown();
//! ```

mod diag;
mod error;
mod mock;
mod mockset;
mod predicate;
mod request;
mod resolver;
mod response;
mod validate;

pub mod http;
pub mod tcp;

pub use error::{NetmockError, PendingMockError, ValidationError};
pub use http::{HttpMockBuilder, HttpMockHandle, HttpServer};
pub use predicate::{Actual, Predicate};
pub use request::{CanonicalRequest, HeaderValue, Headers};
pub use response::ResponseRecord;
pub use tcp::{TcpMockBuilder, TcpMockHandle, TcpServer};
