use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Measurement epilogue the executor appends to its stderr stream as one
/// trailing JSON line.
///
/// `instructions`, `memory_peak_kb` and `limit_reached` are mandatory on the
/// wire; a record missing any of them is treated as no record at all. Every
/// other counter defaults to zero (or empty) when absent, so consumers never
/// see a partially populated record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Instructions retired by the guest program.
    pub instructions: u64,
    /// Peak memory observed by the executor's own accounting.
    pub memory_peak_kb: u64,
    /// True iff the guest was halted for exceeding the instruction ceiling.
    pub limit_reached: bool,

    #[serde(default)]
    pub syscalls: u64,
    #[serde(default)]
    pub syscall_cost: u64,
    #[serde(default)]
    pub syscall_breakdown: BTreeMap<String, u64>,

    // Executor-process memory, reference only; not the guest's allocations.
    #[serde(default)]
    pub memory_rss_kb: u64,
    #[serde(default)]
    pub memory_hwm_kb: u64,
    #[serde(default)]
    pub memory_data_kb: u64,
    #[serde(default)]
    pub memory_stack_kb: u64,

    #[serde(default)]
    pub io_read_bytes: u64,
    #[serde(default)]
    pub io_write_bytes: u64,

    // Allocations made by the executed binary itself.
    #[serde(default)]
    pub guest_mmap_bytes: u64,
    #[serde(default)]
    pub guest_mmap_peak: u64,
    #[serde(default)]
    pub guest_heap_bytes: u64,
}

/// Splits the raw stderr stream into the guest's genuine stderr and the
/// trailing telemetry record.
///
/// The record is the last line of the stream: preceded by a line boundary
/// (start of stream counts), itself a complete JSON object, followed by at
/// most one trailing newline. On a match the record and its surrounding line
/// boundaries are removed; everything before them is returned byte-for-byte.
/// Anything else (no candidate line, malformed JSON, missing mandatory
/// fields) yields the all-default record and the stream unmodified.
///
/// Guest stderr that happens to end in a line shaped like a record is
/// indistinguishable from telemetry; that ambiguity is inherent to sharing
/// one byte channel and is part of the executor wire contract.
pub(crate) fn extract(stderr: Vec<u8>) -> (Vec<u8>, TelemetryRecord) {
    let Some((line_start, line)) = trailing_line(&stderr) else {
        return (stderr, TelemetryRecord::default());
    };
    if !(line.starts_with(b"{") && line.ends_with(b"}")) {
        return (stderr, TelemetryRecord::default());
    }

    match serde_json::from_slice::<TelemetryRecord>(line) {
        Ok(record) => {
            let mut clean = stderr;
            // Drop the record, its trailing newline, and the line boundary
            // separating it from the guest's output.
            clean.truncate(line_start.saturating_sub(1));
            (clean, record)
        }
        Err(err) => {
            log::warn!("trailing JSON object is not a telemetry record: {err}");
            (stderr, TelemetryRecord::default())
        }
    }
}

/// Last line of the stream after stripping at most one trailing newline.
/// Returns the line's byte offset and contents, or `None` for an empty
/// stream.
fn trailing_line(stream: &[u8]) -> Option<(usize, &[u8])> {
    let body = match stream {
        [] => return None,
        [head @ .., b'\n'] => head,
        _ => stream,
    };
    if body.is_empty() {
        return None;
    }
    let start = body
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    Some((start, &body[start..]))
}
