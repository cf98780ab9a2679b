use std::time;

use thiserror::Error;

/// Enumeration of errors raised while running or stopping the consumer.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("consumer task panicked or was aborted: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
    #[error("consumer did not stop within {0:?}")]
    ShutdownTimeout(time::Duration),
}
