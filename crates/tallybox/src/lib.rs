//! Harness for running untrusted guest binaries inside a containerized
//! executor.
//!
//! The harness itself never interprets the guest. It stages the binary to a
//! uniquely named temp file, translates [`ExecutionLimits`] into a fixed
//! isolation argv for the container engine, drives the executor image
//! synchronously under a wall-clock deadline, then splits the executor's
//! trailing telemetry line back out of the stderr stream. The executor image
//! is the component that actually counts instructions and enforces the
//! in-guest ceilings; its contract is documented on [`TelemetryRecord`].
//!
//! ```no_run
//! use tallybox::{ExecutionLimits, Sandbox};
//!
//! # fn main() -> tallybox::Result<()> {
//! let sandbox = Sandbox::default();
//! let result = sandbox.run(include_bytes!("lib.rs"), &ExecutionLimits::default())?;
//! println!("guest exited {} after {} instructions",
//!     result.exit_code, result.telemetry.instructions);
//! # Ok(())
//! # }
//! ```

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

mod config;
mod error;
mod invoke;
mod limits;
mod stage;
mod telemetry;

pub use config::{
    Engine, EngineParseError, ExecutorConfig, DEFAULT_IMAGE, ENV_ENGINE, ENV_ENGINE_BIN, ENV_IMAGE,
};
pub use error::{Error, Result};
pub use limits::{
    ExecutionLimits, DEFAULT_INSTRUCTION_LIMIT, DEFAULT_MEMORY_LIMIT_MB, DEFAULT_TIMEOUT,
    ENV_INSTRUCTION_LIMIT, GUEST_BINARY_PATH,
};
pub use telemetry::TelemetryRecord;

use invoke::RawOutput;
use stage::StagedPayload;

/// Complete outcome of one guest execution. Immutable snapshot; nothing in
/// it refers back to the container, which is gone by the time this exists.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Guest exit code as the engine reported it (128+signal when killed).
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    /// Guest stderr with the telemetry epilogue already removed.
    pub stderr: Vec<u8>,
    /// Parsed epilogue, or all defaults when the executor emitted none.
    pub telemetry: TelemetryRecord,
    /// Wall-clock time of the whole invocation, engine startup included.
    pub duration: Duration,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Handle for executing guest binaries against one executor configuration.
///
/// Stateless and cheap to clone; every [`run`](Sandbox::run) stages its own
/// payload and container, so concurrent runs never share anything.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: ExecutorConfig,
}

impl Sandbox {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Whether the configured engine answers at all. Useful as a preflight
    /// before accepting work; a `false` here means every run would fail with
    /// [`Error::Launch`].
    pub fn probe(&self) -> bool {
        Command::new(self.config.engine_command())
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Runs one guest binary to completion under `limits`.
    ///
    /// Blocks until the executor exits or the wall-clock budget elapses. The
    /// staged payload file is removed on every path out of this function,
    /// errors included.
    pub fn run(&self, binary: &[u8], limits: &ExecutionLimits) -> Result<ExecutionResult> {
        let staged = StagedPayload::write(binary)?;
        let container_name = staged.container_name();
        let args = limits::engine_run_args(staged.path(), &container_name, limits, &self.config);

        let start = Instant::now();
        let raw = invoke::invoke(&self.config, &container_name, &args, limits)?;
        let duration = start.elapsed();

        Ok(assemble(raw, duration))
    }
}

fn assemble(raw: RawOutput, duration: Duration) -> ExecutionResult {
    let (stderr, telemetry) = telemetry::extract(raw.stderr);
    ExecutionResult {
        exit_code: raw.exit_code,
        stdout: raw.stdout,
        stderr,
        telemetry,
        duration,
        stdout_truncated: raw.stdout_truncated,
        stderr_truncated: raw.stderr_truncated,
    }
}
