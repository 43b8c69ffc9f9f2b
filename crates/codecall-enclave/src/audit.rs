//! Audit trail for enclave runs.
//!
//! Every call to [`Enclave::run`](crate::Enclave::run) emits one
//! [`AuditEntry`]:
//! - a UUID execution id and the start timestamp
//! - the SHA-256 of the script and a short, redacted preview (never the
//!   full source)
//! - one record per dispatched tool call, with hashed arguments
//! - the duration and the final status
//!
//! Backends implement [`AuditLogger`]. [`JsonLinesAuditLogger`] writes
//! newline-delimited JSON to any `AsyncWrite`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use codecall_error::ToolCallError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::result::ExecutionResult;
use crate::ToolHandler;

/// Maximum length of the code preview, in characters.
const CODE_PREVIEW_MAX: usize = 500;

/// A complete audit record for one run.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Unique execution identifier.
    pub execution_id: String,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the submitted script.
    pub code_hash: String,
    /// Redacted head of the script, for human review.
    pub code_preview: String,
    /// Tool calls that reached the handler, in dispatch order.
    pub tool_calls: Vec<ToolCallAudit>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Serialized size of the `ok` result in bytes, 0 otherwise.
    pub result_size_bytes: usize,
    /// Final status.
    pub outcome: AuditOutcome,
}

/// Audit record for one dispatched tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallAudit {
    /// Tool name.
    pub tool: String,
    /// SHA-256 of the serialized arguments. Arguments are never stored raw.
    pub args_hash: String,
    /// Serialized argument size in bytes.
    pub args_size_bytes: usize,
    /// Time spent in the handler, in milliseconds.
    pub duration_ms: u64,
    /// Whether the handler succeeded.
    pub success: bool,
    /// The handler's error code, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Final status of a run, mirroring the result variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The script returned normally.
    Ok,
    /// The script never parsed.
    SyntaxError {
        /// Parser message.
        message: String,
    },
    /// A security rule rejected the script.
    IllegalAccess {
        /// Rule that fired.
        kind: String,
    },
    /// The script faulted.
    RuntimeError {
        /// Error class name, if any.
        name: Option<String>,
    },
    /// A tool call failed.
    ToolError {
        /// The failing tool.
        tool_name: String,
        /// Handler error code, if any.
        code: Option<String>,
    },
    /// A time, iteration, tool-call or memory budget ran out.
    Timeout {
        /// Which budget.
        message: String,
    },
}

impl AuditOutcome {
    /// The status string.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::SyntaxError { .. } => "syntax_error",
            Self::IllegalAccess { .. } => "illegal_access",
            Self::RuntimeError { .. } => "runtime_error",
            Self::ToolError { .. } => "tool_error",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Trait for audit log backends.
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Write an audit entry.
    async fn log(&self, entry: &AuditEntry);
}

/// Writes audit entries as newline-delimited JSON to an `AsyncWrite` sink.
pub struct JsonLinesAuditLogger<W: AsyncWrite + Unpin + Send> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesAuditLogger<W> {
    /// Create a logger writing to the given sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Take the sink back.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> AuditLogger for JsonLinesAuditLogger<W> {
    async fn log(&self, entry: &AuditEntry) {
        let mut line = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write audit entry");
            return;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(error = %e, "failed to flush audit sink");
        }
    }
}

/// Discards every entry.
pub struct NoopAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: &AuditEntry) {}
}

/// Emits each entry as one `INFO` event with `audit = true`.
///
/// Tool calls are summarised as a count. Filter with
/// `RUST_LOG=codecall_enclave::audit=info`.
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, entry: &AuditEntry) {
        tracing::info!(
            audit = true,
            execution_id = %entry.execution_id,
            code_hash = %entry.code_hash,
            duration_ms = entry.duration_ms,
            result_size_bytes = entry.result_size_bytes,
            tool_calls = entry.tool_calls.len(),
            status = entry.outcome.status(),
            "audit"
        );
    }
}

/// SHA-256 of a string as lowercase hex.
pub fn sha256_hex(data: &str) -> String {
    Sha256::digest(data.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The first [`CODE_PREVIEW_MAX`] characters of the script, with `...`
/// appended when it was cut.
pub fn code_preview(code: &str) -> String {
    match code.char_indices().nth(CODE_PREVIEW_MAX) {
        Some((cut, _)) => format!("{}...", &code[..cut]),
        None => code.to_string(),
    }
}

/// Collects the parts of an [`AuditEntry`] while a run is in flight.
pub struct AuditEntryBuilder {
    execution_id: String,
    timestamp: DateTime<Utc>,
    code_hash: String,
    code_preview: String,
    tool_calls: Vec<ToolCallAudit>,
    start: Instant,
}

impl AuditEntryBuilder {
    /// Start an entry for `code`.
    pub fn new(code: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            code_hash: sha256_hex(code),
            code_preview: crate::redact::redact_error_message(&code_preview(code)),
            tool_calls: Vec::new(),
            start: Instant::now(),
        }
    }

    /// The execution id this entry will carry.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Record a dispatched tool call.
    pub fn record_tool_call(&mut self, audit: ToolCallAudit) {
        self.tool_calls.push(audit);
    }

    /// Finish the entry with the run's result.
    pub fn finish(self, result: &ExecutionResult) -> AuditEntry {
        let (result_size_bytes, outcome) = match result {
            ExecutionResult::Ok { result, .. } => (
                serde_json::to_vec(result).map(|v| v.len()).unwrap_or(0),
                AuditOutcome::Ok,
            ),
            ExecutionResult::SyntaxError { error } => (
                0,
                AuditOutcome::SyntaxError {
                    message: error.message.clone(),
                },
            ),
            ExecutionResult::IllegalAccess { error } => (
                0,
                AuditOutcome::IllegalAccess {
                    kind: error.kind.clone(),
                },
            ),
            ExecutionResult::RuntimeError { error } => (
                0,
                AuditOutcome::RuntimeError {
                    name: error.name.clone(),
                },
            ),
            ExecutionResult::ToolError { error } => (
                0,
                AuditOutcome::ToolError {
                    tool_name: error.tool_name.clone(),
                    code: error.code.clone(),
                },
            ),
            ExecutionResult::Timeout { error } => (
                0,
                AuditOutcome::Timeout {
                    message: error.message.clone(),
                },
            ),
        };

        AuditEntry {
            execution_id: self.execution_id,
            timestamp: self.timestamp,
            code_hash: self.code_hash,
            code_preview: self.code_preview,
            tool_calls: self.tool_calls,
            duration_ms: self.start.elapsed().as_millis() as u64,
            result_size_bytes,
            outcome,
        }
    }
}

/// A [`ToolHandler`] wrapper that reports every call on a channel.
///
/// The enclave owns the receiving end and drains it into the run's
/// [`AuditEntryBuilder`] once evaluation is over.
pub struct AuditingToolHandler {
    inner: Arc<dyn ToolHandler>,
    audit_tx: mpsc::UnboundedSender<ToolCallAudit>,
}

impl AuditingToolHandler {
    /// Wrap a handler.
    pub fn new(inner: Arc<dyn ToolHandler>, audit_tx: mpsc::UnboundedSender<ToolCallAudit>) -> Self {
        Self { inner, audit_tx }
    }
}

#[async_trait::async_trait]
impl ToolHandler for AuditingToolHandler {
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        let serialized = serde_json::to_string(&args).unwrap_or_default();
        let args_hash = sha256_hex(&serialized);
        let start = Instant::now();

        let result = self.inner.call_tool(name, args).await;

        let audit = ToolCallAudit {
            tool: name.to_string(),
            args_hash,
            args_size_bytes: serialized.len(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.is_ok(),
            error_code: result.as_ref().err().map(|e| e.code().to_string()),
        };
        if self.audit_tx.send(audit).is_err() {
            tracing::debug!(tool = %name, "audit receiver dropped");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RuntimeErrorInfo, TimeoutInfo};

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn preview_keeps_short_code() {
        let code = "return 1 + 2;";
        assert_eq!(code_preview(code), code);
        let exact = "a".repeat(500);
        assert_eq!(code_preview(&exact), exact);
    }

    #[test]
    fn preview_cuts_on_char_boundaries() {
        let code = "\u{1F600}".repeat(600);
        let preview = code_preview(&code);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 503);
    }

    #[test]
    fn preview_is_redacted() {
        let code = r#"const r = await callTool("http:get", {auth: "Bearer abc123secret"});"#;
        let entry = AuditEntryBuilder::new(code).finish(&ExecutionResult::ok(
            serde_json::Value::Null,
            Vec::new(),
        ));
        assert!(!entry.code_preview.contains("abc123secret"));
        assert_eq!(entry.code_hash, sha256_hex(code));
    }

    #[test]
    fn outcome_follows_result_status() {
        let timeout = ExecutionResult::Timeout {
            error: TimeoutInfo {
                message: "execution timed out after 10ms".into(),
            },
        };
        let entry = AuditEntryBuilder::new("x").finish(&timeout);
        assert_eq!(entry.outcome.status(), "timeout");
        assert_eq!(entry.result_size_bytes, 0);

        let runtime = ExecutionResult::RuntimeError {
            error: RuntimeErrorInfo::new("TypeError", "x is not a function", None),
        };
        let entry = AuditEntryBuilder::new("x").finish(&runtime);
        assert_eq!(
            entry.outcome,
            AuditOutcome::RuntimeError {
                name: Some("TypeError".into())
            }
        );
    }

    #[test]
    fn ok_outcome_records_result_size() {
        let entry = AuditEntryBuilder::new("return [1,2];").finish(&ExecutionResult::ok(
            serde_json::json!([1, 2]),
            Vec::new(),
        ));
        assert_eq!(entry.result_size_bytes, 5);
        assert!(Uuid::parse_str(&entry.execution_id).is_ok());
    }

    #[tokio::test]
    async fn json_lines_logger_writes_one_line_per_entry() {
        let logger = JsonLinesAuditLogger::new(Vec::<u8>::new());
        let mut builder = AuditEntryBuilder::new("return 1;");
        builder.record_tool_call(ToolCallAudit {
            tool: "users:get".into(),
            args_hash: sha256_hex("{}"),
            args_size_bytes: 2,
            duration_ms: 1,
            success: false,
            error_code: Some("TOOL_NOT_FOUND".into()),
        });
        let entry = builder.finish(&ExecutionResult::ok(serde_json::json!(1), Vec::new()));
        logger.log(&entry).await;
        logger.log(&entry).await;

        let written = String::from_utf8(logger.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["outcome"]["status"], "ok");
        assert_eq!(parsed["tool_calls"][0]["tool"], "users:get");
        assert_eq!(parsed["tool_calls"][0]["error_code"], "TOOL_NOT_FOUND");
        assert!(parsed["tool_calls"][0].get("args").is_none());
    }

    #[tokio::test]
    async fn tracing_logger_accepts_every_outcome() {
        let logger = TracingAuditLogger;
        for result in [
            ExecutionResult::ok(serde_json::json!(null), Vec::new()),
            ExecutionResult::Timeout {
                error: TimeoutInfo {
                    message: "t".into(),
                },
            },
        ] {
            logger.log(&AuditEntryBuilder::new("x").finish(&result)).await;
        }
    }

    #[tokio::test]
    async fn auditing_handler_reports_calls() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inner: Arc<dyn ToolHandler> = Arc::new(crate::FnToolHandler::new(|name, _args| {
            if name == "fail" {
                Err(ToolCallError::NotFound(name.to_string()))
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }));
        let handler = AuditingToolHandler::new(inner, tx);

        handler
            .call_tool("users:get", serde_json::json!({"id": 1}))
            .await
            .unwrap();
        assert!(handler.call_tool("fail", serde_json::json!({})).await.is_err());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.tool, "users:get");
        assert!(first.success);
        assert_eq!(first.args_hash, sha256_hex(r#"{"id":1}"#));
        let second = rx.try_recv().unwrap();
        assert!(!second.success);
        assert_eq!(second.error_code.as_deref(), Some("TOOL_NOT_FOUND"));
    }
}
