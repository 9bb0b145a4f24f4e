//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings
//! that appear in machine-readable I/O emitted by the tallybox front ends.

pub const TALLYBOX_RUN_REPORT_SCHEMA_VERSION: &str = "tallybox.run.report@0.1.0";
