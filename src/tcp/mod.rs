//! The TCP listener (spec §4.5, §4.7).

mod builder;
mod matcher;
mod server;

pub use builder::{TcpMockBuilder, TcpMockHandle};
pub use server::TcpServer;
