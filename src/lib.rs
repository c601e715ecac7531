//! TCP echo server and load generator for measuring a proxy's throughput
//! and latency.

pub mod bench;
pub mod config;
pub mod counter;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use counter::ActiveClients;
pub use handler::{handle_connection, CloseReason, ConnectionContext};
pub use listener::EchoServer;
