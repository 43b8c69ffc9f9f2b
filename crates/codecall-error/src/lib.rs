#![warn(missing_docs)]

//! Typed errors for tool handlers behind the codecall enclave.
//!
//! Provides [`ToolCallError`], the error every `ToolHandler` returns. The
//! enclave turns it into the `tool_error` result variant (or into a
//! `{success: false, error}` envelope when the script asked for
//! `throwOnError: false`), so the code, message and details defined here are
//! what a script ultimately sees.

use thiserror::Error;

/// Canonical error type for tool invocations made through `callTool`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolCallError {
    /// No tool with this name is registered.
    #[error("tool not found: '{0}'")]
    NotFound(String),

    /// The tool rejected its input.
    #[error("invalid input for tool '{tool}': {message}")]
    InvalidInput {
        /// The tool that rejected the input.
        tool: String,
        /// What was wrong with the input.
        message: String,
        /// Optional machine-readable detail (e.g. schema violations).
        details: Option<serde_json::Value>,
    },

    /// The caller is not permitted to invoke this tool.
    #[error("access denied for tool '{tool}': {reason}")]
    AccessDenied {
        /// The tool that was denied.
        tool: String,
        /// Why access was denied.
        reason: String,
    },

    /// The tool did not answer in time.
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The tool that timed out.
        tool: String,
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The system behind the tool returned an error.
    #[error("upstream error from tool '{tool}': {message}")]
    Upstream {
        /// The tool whose backend failed.
        tool: String,
        /// The upstream error message.
        message: String,
    },

    /// A rate limit was exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// A handler-defined failure with its own error code.
    #[error("{message}")]
    Custom {
        /// Upper-snake-case error code, e.g. `USER_SUSPENDED`.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional machine-readable detail.
        details: Option<serde_json::Value>,
    },

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ToolCallError {
    /// Returns the error code string for programmatic matching.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound(_) => "TOOL_NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::RateLimit(_) => "RATE_LIMIT",
            Self::Custom { code, .. } => code,
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the call may succeed if retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::RateLimit(_) => true,
            Self::Upstream { .. } => true,
            Self::NotFound(_) => false,
            Self::InvalidInput { .. } => false,
            Self::AccessDenied { .. } => false,
            Self::Custom { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Machine-readable details attached to the error, if any.
    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            Self::InvalidInput { details, .. } | Self::Custom { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// Convert to a structured JSON error object.
    ///
    /// Returns a JSON object with `error`, `code`, `message`, `retryable`,
    /// optionally `details`, and optionally `suggested_fix` (populated by
    /// fuzzy matching against `known_tools` for `NotFound` and `AccessDenied`).
    pub fn to_structured_error(&self, known_tools: Option<&[&str]>) -> serde_json::Value {
        let suggested_fix = match self {
            Self::NotFound(tool) | Self::AccessDenied { tool, .. } => {
                known_tools.and_then(|tools| find_similar_tool(tool, tools))
            }
            Self::Timeout { .. } => Some("Retry with a smaller request".to_string()),
            Self::RateLimit(_) => Some("Reduce request frequency".to_string()),
            _ => None,
        };

        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        });

        if let Some(details) = self.details() {
            obj["details"] = details.clone();
        }
        if let Some(fix) = suggested_fix {
            obj["suggested_fix"] = serde_json::Value::String(fix);
        }

        obj
    }
}

/// Find the closest matching tool name using Levenshtein distance.
///
/// Returns a suggestion string if a tool within edit distance 3 is found.
pub fn find_similar_tool(tool: &str, known_tools: &[&str]) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;

    for &candidate in known_tools {
        if candidate == tool {
            continue;
        }
        let dist = strsim::levenshtein(tool, candidate);
        if dist <= 3 && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }

    best.map(|(_, name)| format!("Did you mean '{name}'?"))
}

// Compile-time assertion: ToolCallError must be Send + Sync + 'static
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<ToolCallError>();
};
