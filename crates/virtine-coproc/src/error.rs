use thiserror::Error;

/// Failures constructing a coprocessor.
///
/// Register-level conditions (misaligned accesses, full or empty queues, unknown registers) are
/// not errors: they are reported on the wire through sentinel values.
#[derive(Debug, Error)]
pub enum CoprocError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("failed to spawn coprocessor worker thread")]
    SpawnWorker(#[source] std::io::Error),
}
