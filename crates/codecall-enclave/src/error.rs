//! Error types for the codecall enclave.
//!
//! Every failure inside a run is an [`EnclaveError`]; the result builder
//! ([`crate::result`]) maps each variant onto exactly one
//! [`ExecutionResult`](crate::result::ExecutionResult) status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::Span;

/// Which rule an illegal-access rejection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// A denylisted global (`process`, `eval`, `globalThis`, ...).
    DisallowedGlobal,
    /// A reflective member (`constructor`, `__proto__`, ...) or a built-in
    /// member outside the whitelist.
    IllegalBuiltinAccess,
    /// A construct the language subset excludes (`while`, `function`, ...).
    ForbiddenConstruct,
    /// Statement or expression nesting beyond the configured depth.
    NestingTooDeep,
    /// An arrow function that calls itself through its own binding.
    RecursiveFunction,
    /// A tool call that targets the enclave's own reserved namespace.
    #[serde(rename = "permission_denied")]
    PermissionDenied,
}

impl AccessKind {
    /// Name reported in results.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DisallowedGlobal => "DisallowedGlobal",
            Self::IllegalBuiltinAccess => "IllegalBuiltinAccess",
            Self::ForbiddenConstruct => "ForbiddenConstruct",
            Self::NestingTooDeep => "NestingTooDeep",
            Self::RecursiveFunction => "RecursiveFunction",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource budget that can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Wall-clock deadline.
    WallClock {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },
    /// Iterations of a single loop.
    LoopIterations {
        /// Per-loop maximum.
        max: u64,
    },
    /// Iterations summed over all loops and callbacks in the run.
    TotalIterations {
        /// Per-run maximum.
        max: u64,
    },
    /// Tool calls.
    ToolCalls {
        /// Per-run maximum.
        max: usize,
    },
    /// Bytes of strings and array storage allocated by the script.
    Memory {
        /// Per-run maximum in bytes.
        max: usize,
    },
}

impl std::fmt::Display for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WallClock { timeout_ms } => write!(f, "execution timed out after {timeout_ms}ms"),
            Self::LoopIterations { max } => {
                write!(f, "loop iteration limit exceeded (max {max} iterations per loop)")
            }
            Self::TotalIterations { max } => {
                write!(f, "iteration budget exhausted (max {max} iterations per execution)")
            }
            Self::ToolCalls { max } => {
                write!(f, "tool call limit exceeded (max {max} calls per execution)")
            }
            Self::Memory { max } => {
                write!(f, "memory budget exhausted (max {max} bytes per execution)")
            }
        }
    }
}

/// An error raised by script code, catchable only by the result builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    /// Error class name: `Error`, `TypeError`, `RangeError`, `ReferenceError`, ...
    pub name: String,
    /// Error message.
    pub message: String,
    /// Script-level stack trace, if one was captured.
    pub stack: Option<String>,
}

/// A failed `callTool` that propagated out of the script.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    /// The tool that failed.
    pub tool_name: String,
    /// The arguments it was called with.
    pub tool_input: serde_json::Value,
    /// Redacted error message.
    pub message: String,
    /// Error code (`ACCESS_DENIED`, `ARGS_TOO_LARGE`, handler codes, ...).
    pub code: Option<String>,
    /// Machine-readable details from the handler.
    pub details: Option<serde_json::Value>,
}

/// Errors that can occur while running a script in the enclave.
#[derive(Debug, Error)]
pub enum EnclaveError {
    /// The script could not be parsed.
    #[error("syntax error: {message}")]
    Syntax {
        /// What went wrong.
        message: String,
        /// Where, when known.
        location: Option<Span>,
    },

    /// The script exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// A security rule rejected the script, statically or at runtime.
    #[error("illegal access ({kind}): {message}")]
    IllegalAccess {
        /// Which rule fired.
        kind: AccessKind,
        /// Human-readable explanation.
        message: String,
    },

    /// The script threw, or a runtime type check failed.
    #[error("{}: {}", .0.name, .0.message)]
    Script(ScriptError),

    /// A tool call failed and the script did not opt out of throwing.
    #[error("tool '{}' failed: {}", .0.tool_name, .0.message)]
    Tool(ToolFailure),

    /// A time, iteration, tool-call or memory budget ran out.
    #[error("{0}")]
    ResourceExhausted(Budget),

    /// The final result exceeds the configured maximum size.
    #[error("output exceeds maximum size of {max} bytes")]
    OutputTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// An enclave bug or host failure. The detail is logged, never returned.
    #[error("internal enclave error: {0}")]
    Internal(String),
}

impl EnclaveError {
    /// A syntax error at a known position.
    pub fn syntax_at(message: impl Into<String>, span: Span) -> Self {
        Self::Syntax {
            message: message.into(),
            location: Some(span),
        }
    }

    /// A syntax error with no position.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
            location: None,
        }
    }

    /// An illegal-access rejection.
    pub fn illegal(kind: AccessKind, message: impl Into<String>) -> Self {
        Self::IllegalAccess {
            kind,
            message: message.into(),
        }
    }

    /// Whether this error is one of the run-aborting kinds that script code
    /// can never observe or suppress.
    pub fn is_abort(&self) -> bool {
        !matches!(self, Self::Script(_) | Self::Tool(_))
    }
}

impl From<Budget> for EnclaveError {
    fn from(budget: Budget) -> Self {
        Self::ResourceExhausted(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_messages() {
        assert_eq!(
            Budget::WallClock { timeout_ms: 500 }.to_string(),
            "execution timed out after 500ms"
        );
        assert_eq!(
            Budget::ToolCalls { max: 3 }.to_string(),
            "tool call limit exceeded (max 3 calls per execution)"
        );
    }

    #[test]
    fn display_script_error() {
        let err = EnclaveError::Script(ScriptError {
            name: "TypeError".into(),
            message: "x is not a function".into(),
            stack: None,
        });
        assert_eq!(err.to_string(), "TypeError: x is not a function");
        assert!(!err.is_abort());
    }

    #[test]
    fn illegal_access_is_abort() {
        let err = EnclaveError::illegal(AccessKind::DisallowedGlobal, "process");
        assert!(err.is_abort());
        assert_eq!(err.to_string(), "illegal access (DisallowedGlobal): process");
    }
}
