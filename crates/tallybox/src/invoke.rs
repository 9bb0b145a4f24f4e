use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::limits::ExecutionLimits;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw, uninterpreted output of one executor invocation. Splitting telemetry
/// out of `stderr` is deliberately left to the extractor.
#[derive(Debug)]
pub(crate) struct RawOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Spawns the engine with the translated argv, streams stdin to it, drains
/// both output pipes, and waits until exit or the wall-clock deadline.
///
/// On timeout the child's process group is SIGKILLed, the named container is
/// force-removed, and the call reports [`Error::Timeout`]. No orphaned
/// container or mount survives.
pub(crate) fn invoke(
    config: &ExecutorConfig,
    container_name: &str,
    args: &[String],
    limits: &ExecutionLimits,
) -> Result<RawOutput> {
    let engine = config.engine_command().to_string_lossy().into_owned();
    let launch = |source: std::io::Error| Error::Launch {
        engine: engine.clone(),
        source,
    };

    let mut cmd = Command::new(config.engine_command());
    cmd.args(args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // Own process group, so a timeout can take the engine's descendants
    // down with it.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 && libc::setpgid(0, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().map_err(&launch)?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| launch(std::io::Error::other("child stdin not captured")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| launch(std::io::Error::other("child stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| launch(std::io::Error::other("child stderr not captured")))?;

    let input = limits.stdin.clone();
    let stdin_thread = std::thread::spawn(move || -> std::io::Result<()> {
        use std::io::Write as _;
        stdin.write_all(&input)?;
        stdin.flush()?;
        drop(stdin);
        Ok(())
    });

    let stdout_cap = limits.max_stdout_bytes;
    let stdout_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stdout, stdout_cap)
    });

    let stderr_cap = limits.max_stderr_bytes;
    let stderr_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stderr, stderr_cap)
    });

    let (status, timed_out) = wait_with_deadline(&mut child, limits.timeout).map_err(&launch)?;

    // Broken pipe here just means the guest never read its input.
    let _ = stdin_thread.join();
    let stdout_result = stdout_thread.join().unwrap_or_else(|_| Ok((Vec::new(), false)));
    let stderr_result = stderr_thread.join().unwrap_or_else(|_| Ok((Vec::new(), false)));

    if timed_out {
        force_remove_container(config, container_name);
        return Err(Error::Timeout {
            limit: limits.timeout,
        });
    }

    let (stdout_bytes, stdout_truncated) = stdout_result.map_err(&launch)?;
    let (stderr_bytes, stderr_truncated) = stderr_result.map_err(&launch)?;

    Ok(RawOutput {
        exit_code: exit_code_of(status),
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        stdout_truncated,
        stderr_truncated,
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<(ExitStatus, bool)> {
    let start = Instant::now();
    let deadline = start.checked_add(timeout);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_process_group(child.id());
            let _ = child.kill();
            let status = child.wait()?;
            return Ok((status, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            return;
        };
        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
            let _ = libc::kill(pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Best-effort teardown of a container left behind by a timed-out engine
/// client. The engine keeps running containers alive even after its CLI
/// process dies, so the kill has to go through the engine itself.
fn force_remove_container(config: &ExecutorConfig, container_name: &str) {
    for args in [
        &["kill", "--signal", "SIGKILL", container_name][..],
        &["rm", "-f", container_name][..],
    ] {
        let mut cmd = Command::new(config.engine_command());
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        match cmd.spawn() {
            Ok(mut child) => {
                if let Err(err) = wait_with_deadline(&mut child, CLEANUP_TIMEOUT) {
                    log::warn!("engine {} of {container_name} failed: {err}", args[0]);
                }
            }
            Err(err) => {
                log::warn!("spawn engine {} of {container_name} failed: {err}", args[0]);
            }
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal: Option<i32> = None;

    match status.code() {
        Some(code) => code,
        None => signal.map(|s| 128 + s).unwrap_or(1),
    }
}

fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh_config() -> ExecutorConfig {
        ExecutorConfig {
            engine_bin: Some(PathBuf::from("/bin/sh")),
            ..ExecutorConfig::default()
        }
    }

    fn sh_args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_streams_separately() {
        let out = invoke(
            &sh_config(),
            "tallybox-test",
            &sh_args("echo out; echo err >&2"),
            &ExecutionLimits::default(),
        )
        .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
        assert!(!out.stdout_truncated);
        assert!(!out.stderr_truncated);
    }

    #[test]
    fn exit_code_passes_through() {
        let out = invoke(
            &sh_config(),
            "tallybox-test",
            &sh_args("exit 7"),
            &ExecutionLimits::default(),
        )
        .unwrap();
        assert_eq!(out.exit_code, 7);
    }

    #[test]
    fn stdin_bytes_reach_the_child() {
        let limits = ExecutionLimits {
            stdin: b"ping".to_vec(),
            ..Default::default()
        };
        let out = invoke(&sh_config(), "tallybox-test", &sh_args("cat"), &limits).unwrap();
        assert_eq!(out.stdout, b"ping");
    }

    #[test]
    fn stdout_overrun_is_truncated_and_flagged() {
        let limits = ExecutionLimits {
            max_stdout_bytes: 4,
            ..Default::default()
        };
        let out = invoke(
            &sh_config(),
            "tallybox-test",
            &sh_args("echo 123456789"),
            &limits,
        )
        .unwrap();
        assert_eq!(out.stdout, b"1234");
        assert!(out.stdout_truncated);
    }

    #[test]
    fn timeout_is_a_distinct_error_within_bounds() {
        let limits = ExecutionLimits {
            timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let start = Instant::now();
        let err = invoke(
            &sh_config(),
            "tallybox-test-timeout",
            &sh_args("sleep 30"),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        // 200ms budget plus kill/cleanup slack, nowhere near the sleep.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn unresolvable_engine_is_a_launch_error() {
        let config = ExecutorConfig {
            engine_bin: Some(PathBuf::from("/nonexistent/engine")),
            ..ExecutorConfig::default()
        };
        let err = invoke(
            &config,
            "tallybox-test",
            &sh_args("true"),
            &ExecutionLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }
}
