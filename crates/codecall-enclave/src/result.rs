//! The six result variants of a run and the mapping from [`EnclaveError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::Span;
use crate::error::{EnclaveError, ScriptError, ToolFailure};

/// Outcome of [`Enclave::run`](crate::Enclave::run), discriminated on
/// `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The script returned normally.
    Ok {
        /// Sanitized return value.
        result: Value,
        /// Captured console output.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        logs: Vec<String>,
    },
    /// The script never began executing.
    SyntaxError {
        /// What failed to parse.
        error: SyntaxErrorInfo,
    },
    /// The script used a forbidden construct, global or member.
    IllegalAccess {
        /// Which rule fired.
        error: IllegalAccessInfo,
    },
    /// The script's own logic faulted.
    RuntimeError {
        /// The script error.
        error: RuntimeErrorInfo,
    },
    /// A `callTool` failed and the script did not opt out of throwing.
    ToolError {
        /// The tool failure.
        error: ToolErrorInfo,
    },
    /// A time, iteration, tool-call or memory budget ran out.
    Timeout {
        /// Which budget.
        error: TimeoutInfo,
    },
}

/// Payload of `syntax_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxErrorInfo {
    /// Parser message.
    pub message: String,
    /// Offending position, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Span>,
}

/// Payload of `illegal_access`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IllegalAccessInfo {
    /// Explanation.
    pub message: String,
    /// Rule name, e.g. `DisallowedGlobal`.
    pub kind: String,
}

/// Payload of `runtime_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeErrorInfo {
    /// Always `"script"`.
    pub source: String,
    /// Error message.
    pub message: String,
    /// Error class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Script-level stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RuntimeErrorInfo {
    /// A script-sourced error.
    pub fn new(name: impl Into<String>, message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            source: "script".into(),
            message: message.into(),
            name: Some(name.into()),
            stack,
        }
    }
}

/// Payload of `tool_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolErrorInfo {
    /// Always `"tool"`.
    pub source: String,
    /// The failing tool.
    pub tool_name: String,
    /// The arguments it was called with.
    pub tool_input: Value,
    /// Redacted message.
    pub message: String,
    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Handler details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Payload of `timeout`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    /// Which budget ran out.
    pub message: String,
}

/// Message returned for host failures. The real cause goes to the log.
const INTERNAL_MESSAGE: &str = "the enclave failed to complete the run";

impl ExecutionResult {
    /// An `ok` result.
    pub fn ok(result: Value, logs: Vec<String>) -> Self {
        Self::Ok { result, logs }
    }

    /// The wire status string.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::SyntaxError { .. } => "syntax_error",
            Self::IllegalAccess { .. } => "illegal_access",
            Self::RuntimeError { .. } => "runtime_error",
            Self::ToolError { .. } => "tool_error",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether the run returned normally.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Build the result for a run that ended in `err`.
    pub fn from_error(err: EnclaveError) -> Self {
        match err {
            EnclaveError::Syntax { message, location } => Self::SyntaxError {
                error: SyntaxErrorInfo { message, location },
            },
            e @ EnclaveError::CodeTooLarge { .. } => Self::SyntaxError {
                error: SyntaxErrorInfo {
                    message: e.to_string(),
                    location: None,
                },
            },
            EnclaveError::IllegalAccess { kind, message } => Self::IllegalAccess {
                error: IllegalAccessInfo {
                    message,
                    kind: kind.as_str().to_string(),
                },
            },
            EnclaveError::Script(ScriptError {
                name,
                message,
                stack,
            }) => Self::RuntimeError {
                error: RuntimeErrorInfo::new(name, message, stack),
            },
            EnclaveError::Tool(ToolFailure {
                tool_name,
                tool_input,
                message,
                code,
                details,
            }) => Self::ToolError {
                error: ToolErrorInfo {
                    source: "tool".into(),
                    tool_name,
                    tool_input,
                    message,
                    code,
                    details,
                },
            },
            EnclaveError::ResourceExhausted(budget) => Self::Timeout {
                error: TimeoutInfo {
                    message: budget.to_string(),
                },
            },
            e @ EnclaveError::OutputTooLarge { .. } => Self::RuntimeError {
                error: RuntimeErrorInfo::new("RangeError", e.to_string(), None),
            },
            EnclaveError::Internal(detail) => {
                tracing::error!(detail = %detail, "enclave run failed internally");
                Self::RuntimeError {
                    error: RuntimeErrorInfo::new("InternalError", INTERNAL_MESSAGE, None),
                }
            }
        }
    }
}

impl From<EnclaveError> for ExecutionResult {
    fn from(err: EnclaveError) -> Self {
        Self::from_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AccessKind, Budget};
    use serde_json::json;

    #[test]
    fn ok_omits_empty_logs() {
        let v = serde_json::to_value(ExecutionResult::ok(json!(3), Vec::new())).unwrap();
        assert_eq!(v, json!({"status": "ok", "result": 3}));
        let v = serde_json::to_value(ExecutionResult::ok(json!(null), vec!["hi".into()])).unwrap();
        assert_eq!(v, json!({"status": "ok", "result": null, "logs": ["hi"]}));
    }

    #[test]
    fn syntax_error_carries_location() {
        let r = ExecutionResult::from(EnclaveError::syntax_at("unexpected token", Span::new(2, 5)));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "syntax_error");
        assert_eq!(v["error"]["location"], json!({"line": 2, "column": 5}));
    }

    #[test]
    fn code_too_large_is_a_syntax_error() {
        let r = ExecutionResult::from(EnclaveError::CodeTooLarge { max: 10, actual: 20 });
        assert_eq!(r.status(), "syntax_error");
    }

    #[test]
    fn tool_error_uses_camel_case() {
        let r = ExecutionResult::from(EnclaveError::Tool(ToolFailure {
            tool_name: "users:get".into(),
            tool_input: json!({"id": "1"}),
            message: "boom".into(),
            code: Some("UPSTREAM_ERROR".into()),
            details: None,
        }));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            json!({
                "status": "tool_error",
                "error": {
                    "source": "tool",
                    "toolName": "users:get",
                    "toolInput": {"id": "1"},
                    "message": "boom",
                    "code": "UPSTREAM_ERROR"
                }
            })
        );
    }

    #[test]
    fn budgets_become_timeouts() {
        for budget in [
            Budget::WallClock { timeout_ms: 5 },
            Budget::LoopIterations { max: 10 },
            Budget::ToolCalls { max: 1 },
            Budget::Memory { max: 1024 },
        ] {
            assert_eq!(ExecutionResult::from(EnclaveError::from(budget)).status(), "timeout");
        }
    }

    #[test]
    fn illegal_access_reports_kind() {
        let r = ExecutionResult::from(EnclaveError::illegal(AccessKind::PermissionDenied, "no"));
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"status": "illegal_access", "error": {"message": "no", "kind": "permission_denied"}})
        );
    }

    #[test]
    fn internal_errors_do_not_leak() {
        let r = ExecutionResult::from(EnclaveError::Internal("worker panicked at /src/x.rs".into()));
        match r {
            ExecutionResult::RuntimeError { error } => {
                assert_eq!(error.name.as_deref(), Some("InternalError"));
                assert!(!error.message.contains("x.rs"));
                assert_eq!(error.source, "script");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn output_too_large_is_a_range_error() {
        let r = ExecutionResult::from(EnclaveError::OutputTooLarge { max: 8 });
        match r {
            ExecutionResult::RuntimeError { error } => {
                assert_eq!(error.name.as_deref(), Some("RangeError"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deserializes_wire_shape() {
        let r: ExecutionResult =
            serde_json::from_value(json!({"status": "timeout", "error": {"message": "t"}})).unwrap();
        assert_eq!(r.status(), "timeout");
    }
}
