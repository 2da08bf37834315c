//! HTTP server

pub mod config;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::router;
pub use listener::RelayServer;
