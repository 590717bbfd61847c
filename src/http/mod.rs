//! The HTTP listener (spec §4.4, §4.7).

mod builder;
mod matcher;
mod server;

pub use builder::{HttpMockBuilder, HttpMockHandle};
pub use server::HttpServer;
