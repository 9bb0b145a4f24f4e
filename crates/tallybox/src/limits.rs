use std::path::Path;
use std::time::Duration;

use crate::config::ExecutorConfig;

/// In-sandbox path where the staged binary is bind-mounted read-only.
pub const GUEST_BINARY_PATH: &str = "/work/binary";

/// Environment variable carrying the instruction ceiling into the executor,
/// read by its accounting layer to self-terminate the guest once exceeded.
pub const ENV_INSTRUCTION_LIMIT: &str = "LIMIT";

// Execute-permitted scratch for transient files, smaller non-executable
// scratch for variable state. Both are destroyed with the container.
const SCRATCH_TMP: &str = "--tmpfs=/tmp:rw,exec,nosuid,size=64m";
const SCRATCH_VAR: &str = "--tmpfs=/var:rw,nosuid,size=16m";

pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 10_000_000;
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 256;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_OUTPUT_CAP: usize = 64 * 1024 * 1024;

/// Resource ceilings for one execution. Immutable once passed to
/// [`crate::Sandbox::run`].
///
/// `instruction_limit`, `memory_limit_mb` and `timeout` must be positive.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub instruction_limit: u64,
    pub memory_limit_mb: u32,
    pub timeout: Duration,
    /// Bytes streamed to the executor's standard input.
    pub stdin: Vec<u8>,
    /// Capture caps; overruns are truncated and flagged, never block the guest.
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            timeout: DEFAULT_TIMEOUT,
            stdin: Vec::new(),
            max_stdout_bytes: DEFAULT_OUTPUT_CAP,
            max_stderr_bytes: DEFAULT_OUTPUT_CAP,
        }
    }
}

/// Maps limits onto the engine argv. Pure and deterministic; isolation
/// defaults (no network, read-only root, bounded scratch, equal memory and
/// swap caps) are baked in regardless of caller input.
pub(crate) fn engine_run_args(
    binary_path: &Path,
    container_name: &str,
    limits: &ExecutionLimits,
    config: &ExecutorConfig,
) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-i".to_string(),
        format!("--name={container_name}"),
        format!("--memory={}m", limits.memory_limit_mb),
        format!("--memory-swap={}m", limits.memory_limit_mb),
        "--network=none".to_string(),
        "--read-only".to_string(),
        SCRATCH_TMP.to_string(),
        SCRATCH_VAR.to_string(),
        "-e".to_string(),
        format!("{ENV_INSTRUCTION_LIMIT}={}", limits.instruction_limit),
        "-v".to_string(),
        format!("{}:{GUEST_BINARY_PATH}:ro", binary_path.display()),
        config.image.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_for(limits: &ExecutionLimits) -> Vec<String> {
        engine_run_args(
            Path::new("/tmp/payload"),
            "tallybox-test",
            limits,
            &ExecutorConfig::default(),
        )
    }

    #[test]
    fn defaults_match_documented_values() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.instruction_limit, 10_000_000);
        assert_eq!(limits.memory_limit_mb, 256);
        assert_eq!(limits.timeout, Duration::from_secs(30));
        assert!(limits.stdin.is_empty());
    }

    #[test]
    fn isolation_flags_are_unconditional() {
        let args = args_for(&ExecutionLimits::default());
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&SCRATCH_TMP.to_string()));
        assert!(args.contains(&SCRATCH_VAR.to_string()));
        assert!(args.contains(&"--rm".to_string()));
    }

    #[test]
    fn memory_and_swap_caps_are_equal() {
        let limits = ExecutionLimits {
            memory_limit_mb: 512,
            ..Default::default()
        };
        let args = args_for(&limits);
        assert!(args.contains(&"--memory=512m".to_string()));
        assert!(args.contains(&"--memory-swap=512m".to_string()));
    }

    #[test]
    fn instruction_limit_travels_as_env_var() {
        let limits = ExecutionLimits {
            instruction_limit: 42,
            ..Default::default()
        };
        let args = args_for(&limits);
        let e = args.iter().position(|a| a == "-e").unwrap();
        assert_eq!(args[e + 1], "LIMIT=42");
    }

    #[test]
    fn binary_is_mounted_read_only_at_fixed_path() {
        let args = args_for(&ExecutionLimits::default());
        assert!(args.contains(&"/tmp/payload:/work/binary:ro".to_string()));
    }

    #[test]
    fn translation_is_deterministic_and_ends_with_image() {
        let limits = ExecutionLimits::default();
        let a = args_for(&limits);
        let b = args_for(&limits);
        assert_eq!(a, b);
        assert_eq!(a.last().unwrap(), "tallybox-executor");
    }
}
