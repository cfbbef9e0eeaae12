//! Run-wide immutable configuration, assembled by the CLI front-end and
//! shared (read-only) by every worker thread and pipeline stage.
//!
//! Grounded on the `xdd_global_data` struct (`GO_*` option bits) in the
//! original source; the ambient logging/report fields follow the
//! teacher's `Config` struct in `lib.rs`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Run-wide option flags (`GO_*` in the original tool).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GlobalOptions: u32 {
        const NOBARRIER = 0b0000_0001;
        const DEBUG     = 0b0000_0010;
    }
}

/// Output format for the end-of-run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Immutable, run-wide configuration. Built once by the CLI and shared
/// behind an `Arc` for the lifetime of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Barrier period for the syncio stage; 0 disables syncio.
    pub syncio_period: u64,
    pub options: GlobalOptions,
    /// Stop the run once this many total errors have been recorded
    /// across all targets. 0 means unlimited.
    pub max_errors: u64,
    pub passes: u32,
    pub report_format: ReportFormat,
    pub report_path: Option<PathBuf>,
    /// `tracing-subscriber` `EnvFilter` directive string, e.g. "info" or
    /// "xddr=debug".
    pub log_filter: String,
    /// Ring capacity for the timestamp recorder (section 4.8); `None`
    /// disables timestamp collection entirely.
    pub timestamp_capacity: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            syncio_period: 0,
            options: GlobalOptions::empty(),
            max_errors: 0,
            passes: 1,
            report_format: ReportFormat::Text,
            report_path: None,
            log_filter: "info".to_string(),
            timestamp_capacity: None,
        }
    }
}
