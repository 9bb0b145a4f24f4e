use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of a harness invocation.
///
/// A non-zero guest exit code and missing/malformed telemetry are not
/// failures; both yield a fully populated [`crate::ExecutionResult`].
#[derive(Debug, Error)]
pub enum Error {
    /// The payload could not be staged; the executor was never invoked.
    #[error("stage payload: {0}")]
    Stage(#[source] std::io::Error),

    /// The container engine could not be driven (unreachable binary, broken
    /// pipes, wait failure). Carries the engine diagnostic.
    #[error("launch {engine} executor: {source}")]
    Launch {
        engine: String,
        #[source]
        source: std::io::Error,
    },

    /// The wall-clock budget elapsed before the executor finished. The child
    /// process group and its container have been force-terminated.
    #[error("executor timed out after {:?}", .limit)]
    Timeout { limit: Duration },
}
