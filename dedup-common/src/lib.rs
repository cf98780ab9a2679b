pub mod env;
pub mod event;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod store;
