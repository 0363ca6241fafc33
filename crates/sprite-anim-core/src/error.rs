//! Closed error-code taxonomy shared by every component.
//!
//! Mirrors how this codebase centralises error codes in a dedicated `error`
//! module per crate: one enum, one `code()` accessor, drawn from at every
//! emission site instead of ad-hoc strings.

use std::path::PathBuf;
use thiserror::Error;

/// The closed set of machine-readable error codes a client can switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    PathOutsideWorkspace,
    FileNotFound,
    AsepriteNotFound,
    AsepriteExitNonzero,
    LuaReportedFailure,
    OutputValidationFailed,
    JobOverrideInvalid,
    CleanupScriptNotFound,
    AsepriteCleanupFailed,
    CleanupError,
    ValidationError,
    UnexpectedException,
    UnknownTool,
    AsepriteError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PathOutsideWorkspace => "PATH_OUTSIDE_WORKSPACE",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::AsepriteNotFound => "ASEPRITE_NOT_FOUND",
            ErrorCode::AsepriteExitNonzero => "ASEPRITE_EXIT_NONZERO",
            ErrorCode::LuaReportedFailure => "LUA_REPORTED_FAILURE",
            ErrorCode::OutputValidationFailed => "OUTPUT_VALIDATION_FAILED",
            ErrorCode::JobOverrideInvalid => "JOB_OVERRIDE_INVALID",
            ErrorCode::CleanupScriptNotFound => "CLEANUP_SCRIPT_NOT_FOUND",
            ErrorCode::AsepriteCleanupFailed => "ASEPRITE_CLEANUP_FAILED",
            ErrorCode::CleanupError => "CLEANUP_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::UnexpectedException => "UNEXPECTED_EXCEPTION",
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::AsepriteError => "ASEPRITE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by the core orchestration plane.
///
/// `code()` maps every variant onto the closed `ErrorCode` set. Script-supplied
/// codes from `meta.json` don't fit a fixed variant, so `ScriptReported` carries
/// the code string straight through.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("path '{field}' ('{path}') escapes workspace root '{workspace_root}'")]
    PathOutsideWorkspace {
        field: String,
        path: PathBuf,
        workspace_root: PathBuf,
    },

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("external tool executable not found. Set ASEPRITE_EXE or install it on PATH")]
    ToolNotFound,

    #[error("external tool exited with status {exit_code}")]
    ToolExitNonzero { exit_code: i32 },

    #[error("{message}")]
    ScriptReported { code: String, message: String },

    #[error("output validation failed: missing {missing:?}")]
    OutputValidationFailed {
        missing: Vec<String>,
        parse_error: Option<String>,
    },

    #[error("sidecar override invalid at {path}: {reason}")]
    JobOverrideInvalid { path: PathBuf, reason: String },

    #[error("cleanup script not found: {0}")]
    CleanupScriptNotFound(PathBuf),

    #[error("cleanup invocation failed: {0}")]
    CleanupFailed(String),

    #[error("cleanup error: {0}")]
    CleanupError(String),

    #[error("argument validation failed: {0}")]
    Validation(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("failed to spawn external tool: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Unexpected(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::PathOutsideWorkspace { .. } => ErrorCode::PathOutsideWorkspace,
            CoreError::FileNotFound(_) => ErrorCode::FileNotFound,
            CoreError::ToolNotFound => ErrorCode::AsepriteNotFound,
            CoreError::ToolExitNonzero { .. } => ErrorCode::AsepriteExitNonzero,
            CoreError::ScriptReported { .. } => ErrorCode::LuaReportedFailure,
            CoreError::OutputValidationFailed { .. } => ErrorCode::OutputValidationFailed,
            CoreError::JobOverrideInvalid { .. } => ErrorCode::JobOverrideInvalid,
            CoreError::CleanupScriptNotFound(_) => ErrorCode::CleanupScriptNotFound,
            CoreError::CleanupFailed(_) => ErrorCode::AsepriteCleanupFailed,
            CoreError::CleanupError(_) => ErrorCode::CleanupError,
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::UnknownTool(_) => ErrorCode::UnknownTool,
            CoreError::SpawnFailed(_) => ErrorCode::AsepriteError,
            CoreError::Io(_) => ErrorCode::UnexpectedException,
            CoreError::Unexpected(_) => ErrorCode::UnexpectedException,
        }
    }

    /// The script-reported error code, when this variant carries one, else the
    /// closed-set code's string form.
    pub fn code_str(&self) -> String {
        match self {
            CoreError::ScriptReported { code, .. } => code.clone(),
            other => other.code().as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings_match_spec_table() {
        assert_eq!(ErrorCode::PathOutsideWorkspace.as_str(), "PATH_OUTSIDE_WORKSPACE");
        assert_eq!(ErrorCode::AsepriteExitNonzero.as_str(), "ASEPRITE_EXIT_NONZERO");
        assert_eq!(ErrorCode::UnexpectedException.as_str(), "UNEXPECTED_EXCEPTION");
    }

    #[test]
    fn script_reported_carries_custom_code() {
        let err = CoreError::ScriptReported {
            code: "INPUT_NOT_FOUND".into(),
            message: "Input file not found: /tmp/foo.png".into(),
        };
        assert_eq!(err.code_str(), "INPUT_NOT_FOUND");
        assert_eq!(err.code(), ErrorCode::LuaReportedFailure);
    }
}
