//! Structured error handling and exit codes.

use serde::Serialize;

/// Process exit codes for ctdupe.
///
/// - 0: Duplicates found
/// - 1: General error (bad input, I/O failure, corrupt run)
/// - 2: No duplicates found
/// - 3: Completed, but some input lines were skipped
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the run completed and duplicate groups were written.
    Success = 0,
    /// General error: the run failed.
    GeneralError = 1,
    /// No duplicates: the run completed but every fingerprint was unique.
    NoDuplicates = 2,
    /// Partial success: the run completed but skipped undecodable lines.
    PartialSuccess = 3,
    /// Interrupted: the run was stopped by the user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "CT000",
            Self::GeneralError => "CT001",
            Self::NoDuplicates => "CT002",
            Self::PartialSuccess => "CT003",
            Self::Interrupted => "CT130",
        }
    }

    /// Pick the exit code for a completed run.
    ///
    /// Skipped lines take precedence over the duplicate count.
    #[must_use]
    pub fn for_completed_run(duplicate_groups: u64, skipped_lines: u64) -> Self {
        if skipped_lines > 0 {
            Self::PartialSuccess
        } else if duplicate_groups > 0 {
            Self::Success
        } else {
            Self::NoDuplicates
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "CT001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
