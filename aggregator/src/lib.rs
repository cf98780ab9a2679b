pub mod api;
pub mod config;
pub mod handlers;
pub mod router;
pub mod server;
