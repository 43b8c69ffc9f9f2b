//! The host side of `callTool`.
//!
//! The interpreter owns ordering and quota (it talks to the governor); the
//! bridge owns everything that concerns the collaborator: which names are
//! reserved, which are allowed, how large arguments may be, and how a
//! handler's answer is cleaned before it re-enters the script.

use std::collections::BTreeSet;
use std::sync::Arc;

use codecall_error::find_similar_tool;
use serde_json::Value;

use crate::error::ToolFailure;
use crate::redact::{redact_error_message, redact_json};
use crate::sanitize::{json_size, sanitize_json, MAX_JSON_DEPTH};
use crate::ToolHandler;

/// Per-run view of the tool collaborator.
pub(crate) struct Bridge {
    handler: Arc<dyn ToolHandler>,
    allowed: Option<BTreeSet<String>>,
    reserved_prefixes: Vec<String>,
    max_args_size: usize,
}

impl Bridge {
    pub(crate) fn new(
        handler: Arc<dyn ToolHandler>,
        allowed: Option<BTreeSet<String>>,
        reserved_prefixes: Vec<String>,
        max_args_size: usize,
    ) -> Self {
        Self {
            handler,
            allowed,
            reserved_prefixes,
            max_args_size,
        }
    }

    /// Whether `name` lies in the enclave's own namespace. Matching ignores
    /// case and surrounding whitespace so `" CodeCall:Invoke"` is caught too.
    pub(crate) fn is_reserved(&self, name: &str) -> bool {
        let normalized = name.trim().to_lowercase();
        self.reserved_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(&prefix.trim().to_lowercase()))
    }

    /// Allow-list check. On denial returns the `ACCESS_DENIED` message,
    /// with a suggestion when an allowed name is close.
    pub(crate) fn check_allowed(&self, name: &str) -> Result<(), String> {
        let Some(allowed) = &self.allowed else {
            return Ok(());
        };
        if allowed.contains(name) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(String::as_str).collect();
        let mut message = format!("tool '{name}' is not in the allowed tools list");
        if let Some(hint) = find_similar_tool(name, &names) {
            message.push_str(". ");
            message.push_str(&hint);
        }
        Err(message)
    }

    /// Serialized-size check on outgoing arguments.
    pub(crate) fn check_args_size(&self, args: &Value) -> Result<(), String> {
        let size = json_size(args);
        if size > self.max_args_size {
            return Err(format!(
                "tool arguments are {size} bytes, exceeding the maximum of {} bytes",
                self.max_args_size
            ));
        }
        Ok(())
    }

    /// Invoke the collaborator.
    ///
    /// Success values are sanitized; failures come back as a redacted
    /// [`ToolFailure`] carrying the handler's error code.
    pub(crate) async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolFailure> {
        tracing::debug!(tool = %name, args_size = json_size(&args), "dispatching tool call");
        match self.handler.call_tool(name, args.clone()).await {
            Ok(value) => Ok(sanitize_json(value, MAX_JSON_DEPTH)),
            Err(err) => {
                tracing::debug!(tool = %name, code = err.code(), "tool call failed");
                Err(ToolFailure {
                    tool_name: name.to_string(),
                    tool_input: args,
                    message: redact_error_message(&err.to_string()),
                    code: Some(err.code().to_string()),
                    details: err.details().cloned().map(redact_json),
                })
            }
        }
    }
}
