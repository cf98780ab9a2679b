pub mod consumer;
pub mod error;
