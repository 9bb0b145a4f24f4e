use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::Engine as _;
use clap::Parser;

use tallybox::{ExecutionLimits, ExecutorConfig, Sandbox};
use tallybox_contracts::TALLYBOX_RUN_REPORT_SCHEMA_VERSION;

/// Run an untrusted binary inside the containerized executor and report its
/// output and telemetry.
#[derive(Parser, Debug)]
#[command(name = "tallybox", version)]
struct Cli {
    /// Guest binary to execute.
    #[arg(long)]
    binary: PathBuf,

    /// Instruction ceiling enforced by the executor's accounting layer.
    #[arg(long, default_value_t = tallybox::DEFAULT_INSTRUCTION_LIMIT)]
    instruction_limit: u64,

    /// Container memory cap in MiB (swap is capped to the same value).
    #[arg(long, default_value_t = tallybox::DEFAULT_MEMORY_LIMIT_MB)]
    memory_limit_mb: u32,

    /// Wall-clock budget in seconds for the whole invocation.
    #[arg(long, default_value_t = 30.0)]
    timeout_sec: f64,

    /// File streamed to the guest's standard input (empty when omitted).
    #[arg(long)]
    stdin: Option<PathBuf>,

    /// Executor image tag (overrides TALLYBOX_IMAGE).
    #[arg(long)]
    image: Option<String>,

    /// Container engine, docker or podman (overrides TALLYBOX_ENGINE).
    #[arg(long)]
    engine: Option<String>,

    /// Emit one machine-readable JSON report instead of the human summary.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if cli.instruction_limit == 0 {
        bail!("--instruction-limit must be positive");
    }
    if cli.memory_limit_mb == 0 {
        bail!("--memory-limit-mb must be positive");
    }
    if !(cli.timeout_sec > 0.0 && cli.timeout_sec.is_finite()) {
        bail!("--timeout-sec must be positive");
    }

    let mut config = ExecutorConfig::from_env().context("read executor configuration")?;
    if let Some(engine) = &cli.engine {
        config.engine = engine
            .parse()
            .with_context(|| format!("parse --engine {engine:?}"))?;
    }
    if let Some(image) = cli.image.clone() {
        config.image = image;
    }

    let binary = std::fs::read(&cli.binary)
        .with_context(|| format!("read binary {}", cli.binary.display()))?;
    let stdin = match &cli.stdin {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("read stdin file {}", path.display()))?
        }
        None => Vec::new(),
    };

    let limits = ExecutionLimits {
        instruction_limit: cli.instruction_limit,
        memory_limit_mb: cli.memory_limit_mb,
        timeout: Duration::from_secs_f64(cli.timeout_sec),
        stdin,
        ..Default::default()
    };

    let result = Sandbox::new(config).run(&binary, &limits)?;

    if cli.json {
        let b64 = base64::engine::general_purpose::STANDARD;
        let report = serde_json::json!({
            "schema_version": TALLYBOX_RUN_REPORT_SCHEMA_VERSION,
            "exit_code": result.exit_code,
            "stdout_b64": b64.encode(&result.stdout),
            "stderr_b64": b64.encode(&result.stderr),
            "stdout_truncated": result.stdout_truncated,
            "stderr_truncated": result.stderr_truncated,
            "execution_time_ms": result.duration.as_millis() as u64,
            "telemetry": result.telemetry,
        });
        println!("{report}");
    } else {
        println!("Exit code:    {}", result.exit_code);
        println!("Instructions: {}", result.telemetry.instructions);
        println!("Memory peak:  {} kB", result.telemetry.memory_peak_kb);
        println!("Limit hit:    {}", result.telemetry.limit_reached);
        if result.telemetry.syscalls > 0 {
            println!("Syscalls:     {}", result.telemetry.syscalls);
        }
        println!("Time:         {} ms", result.duration.as_millis());
        println!("Stdout:");
        print!("{}", String::from_utf8_lossy(&result.stdout));
        if !result.stderr.is_empty() {
            println!("Stderr:");
            print!("{}", String::from_utf8_lossy(&result.stderr));
        }
    }

    Ok(if result.exit_code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
