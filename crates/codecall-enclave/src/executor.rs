//! The enclave: validates, parses and evaluates one script per run.
//!
//! Each run gets a fresh AST, scope tree, heap and governor. Nothing
//! survives between runs except the tool handler reference.
//!
//! Interpreter values are `!Send`, so evaluation runs on a dedicated thread
//! with its own single-threaded tokio runtime. The public API is fully async
//! and `Send`-safe.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Semaphore};

use crate::ast::Program;
use crate::ast_validator;
use crate::audit::{
    AuditEntryBuilder, AuditLogger, AuditingToolHandler, NoopAuditLogger, ToolCallAudit,
};
use crate::bridge::Bridge;
use crate::error::{Budget, EnclaveError};
use crate::governor::Limits;
use crate::interpreter::{evaluate, Environment, RunLimits};
use crate::parser::{parse_with_options, ParseOptions};
use crate::result::ExecutionResult;
use crate::validator::validate_code;
use crate::ToolHandler;

/// Stack size of the evaluation thread. The evaluator recurses on the AST.
const WORKER_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Extra time the caller waits past the deadline before abandoning a worker
/// that has not reported back.
const BACKSTOP_GRACE: Duration = Duration::from_secs(1);

/// Enclave-wide configuration. [`RunOptions`] override parts of it per run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnclaveConfig {
    /// Wall-clock budget per run.
    pub timeout: Duration,
    /// Maximum `callTool` invocations per run.
    pub max_tool_calls: usize,
    /// Maximum iterations of any single loop.
    pub max_loop_iterations: u64,
    /// Maximum loop iterations plus closure calls per run.
    pub max_total_iterations: u64,
    /// Maximum closure call depth.
    pub max_call_depth: usize,
    /// Maximum script size in bytes.
    pub max_code_size: usize,
    /// Maximum statement/expression nesting accepted by the static validator.
    pub max_nesting_depth: usize,
    /// Maximum serialized size of an `ok` result in bytes.
    pub max_output_size: usize,
    /// Maximum serialized size of one tool call's arguments in bytes.
    pub max_tool_call_args_size: usize,
    /// Maximum length of any string value, in UTF-8 bytes.
    pub max_string_length: usize,
    /// Maximum length of any array.
    pub max_array_length: usize,
    /// Allocation budget per run, in approximate bytes.
    pub max_allocated_bytes: usize,
    /// Maximum captured console entries per run.
    pub max_log_entries: usize,
    /// Maximum characters per captured console entry.
    pub max_log_entry_len: usize,
    /// Maximum runs evaluating at once. Further runs wait.
    pub max_concurrent: usize,
    /// Tool-name prefixes scripts may never call.
    pub reserved_tool_prefixes: Vec<String>,
    /// Parse `while`, `do...while` and `function` so the validator can
    /// report them as `ForbiddenConstruct` instead of a syntax error.
    pub permissive_parse: bool,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_tool_calls: 100,
            max_loop_iterations: 10_000,
            max_total_iterations: 100_000,
            max_call_depth: 64,
            max_code_size: 64 * 1024,     // 64 KB
            max_nesting_depth: 64,
            max_output_size: 1024 * 1024, // 1 MB
            max_tool_call_args_size: 1024 * 1024,
            max_string_length: 1024 * 1024,
            max_array_length: 100_000,
            max_allocated_bytes: 64 * 1024 * 1024, // 64 MB
            max_log_entries: 1000,
            max_log_entry_len: 4096,
            max_concurrent: 8,
            reserved_tool_prefixes: vec!["codecall:".to_string()],
            permissive_parse: false,
        }
    }
}

/// Per-run options. Unset fields fall back to the [`EnclaveConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// When set, only these tools may be called.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Read-only data exposed to the script as `codecallContext`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Wall-clock budget in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Maximum tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<usize>,
    /// Maximum iterations per loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_loop_iterations: Option<u64>,
}

impl RunOptions {
    /// Restrict the run to `tools`.
    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Expose `context` as `codecallContext`.
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Override the wall-clock budget.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Override the tool-call quota.
    pub fn max_tool_calls(mut self, max: usize) -> Self {
        self.max_tool_calls = Some(max);
        self
    }

    /// Override the per-loop iteration limit.
    pub fn max_loop_iterations(mut self, max: u64) -> Self {
        self.max_loop_iterations = Some(max);
        self
    }
}

/// Runs scripts against one tool handler.
///
/// This is `Send + Sync`; share it behind an `Arc`. A semaphore bounds how
/// many runs evaluate at once.
pub struct Enclave {
    config: EnclaveConfig,
    handler: Arc<dyn ToolHandler>,
    semaphore: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
}

impl Enclave {
    /// Create an enclave that dispatches `callTool` to `handler`.
    pub fn new(config: EnclaveConfig, handler: Arc<dyn ToolHandler>) -> Self {
        Self::with_audit_logger(config, handler, Arc::new(NoopAuditLogger))
    }

    /// Create an enclave that also reports every run to `logger`.
    pub fn with_audit_logger(
        config: EnclaveConfig,
        handler: Arc<dyn ToolHandler>,
        logger: Arc<dyn AuditLogger>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            handler,
            semaphore,
            audit_logger: logger,
        }
    }

    /// The enclave-wide configuration.
    pub fn config(&self) -> &EnclaveConfig {
        &self.config
    }

    /// Run `code` and classify the outcome.
    ///
    /// Never fails: every problem, including host failures, is one of the
    /// six [`ExecutionResult`] variants.
    pub async fn run(&self, code: &str, options: RunOptions) -> ExecutionResult {
        let mut audit_builder = AuditEntryBuilder::new(code);
        tracing::info!(
            execution_id = %audit_builder.execution_id(),
            code_len = code.len(),
            "run: starting"
        );

        let (audit_tx, mut audit_rx) = tokio::sync::mpsc::unbounded_channel::<ToolCallAudit>();
        let handler: Arc<dyn ToolHandler> =
            Arc::new(AuditingToolHandler::new(self.handler.clone(), audit_tx));

        let result = match self.execute(code, options, handler).await {
            Ok((value, logs)) => ExecutionResult::ok(value, logs),
            Err(e) => ExecutionResult::from_error(e),
        };

        while let Ok(tool_audit) = audit_rx.try_recv() {
            audit_builder.record_tool_call(tool_audit);
        }
        let entry = audit_builder.finish(&result);
        self.audit_logger.log(&entry).await;

        match &result {
            ExecutionResult::Ok { .. } => tracing::info!(
                execution_id = %entry.execution_id,
                duration_ms = entry.duration_ms,
                tool_calls = entry.tool_calls.len(),
                "run: complete"
            ),
            other => tracing::info!(
                execution_id = %entry.execution_id,
                duration_ms = entry.duration_ms,
                status = other.status(),
                "run: failed"
            ),
        }
        result
    }

    fn run_limits(&self, options: &RunOptions) -> RunLimits {
        let config = &self.config;
        RunLimits {
            governor: Limits {
                timeout: options
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(config.timeout),
                max_tool_calls: options.max_tool_calls.unwrap_or(config.max_tool_calls),
                max_loop_iterations: options
                    .max_loop_iterations
                    .unwrap_or(config.max_loop_iterations),
                max_total_iterations: config.max_total_iterations,
                max_call_depth: config.max_call_depth,
            },
            max_string_length: config.max_string_length,
            max_array_length: config.max_array_length,
            max_allocated_bytes: config.max_allocated_bytes,
            max_log_entries: config.max_log_entries,
            max_log_entry_len: config.max_log_entry_len,
            max_output_size: config.max_output_size,
        }
    }

    /// Parse and statically validate `code` without running it.
    pub async fn check(&self, code: &str) -> ExecutionResult {
        match self.compile_only(code).await {
            Ok(()) => ExecutionResult::ok(Value::Null, Vec::new()),
            Err(e) => ExecutionResult::from_error(e),
        }
    }

    async fn compile_only(&self, code: &str) -> Result<(), EnclaveError> {
        validate_code(code, Some(self.config.max_code_size))?;
        let front_end = self.front_end();
        let code = code.to_string();
        let rx = on_worker(move || front_end.compile(&code).map(drop))?;
        rx.await
            .map_err(|_| EnclaveError::Internal("enclave worker thread panicked".into()))?
    }

    fn front_end(&self) -> FrontEnd {
        FrontEnd {
            parse: ParseOptions {
                permissive: self.config.permissive_parse,
            },
            max_nesting_depth: self.config.max_nesting_depth,
        }
    }

    async fn execute(
        &self,
        code: &str,
        options: RunOptions,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(Value, Vec<String>), EnclaveError> {
        validate_code(code, Some(self.config.max_code_size))?;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EnclaveError::Internal("enclave semaphore closed".into()))?;

        let limits = self.run_limits(&options);
        let timeout = limits.governor.timeout;
        let allowed = options
            .allowed_tools
            .map(|tools| tools.into_iter().collect::<BTreeSet<_>>());
        let env = Environment {
            limits,
            bridge: Bridge::new(
                handler,
                allowed,
                self.config.reserved_tool_prefixes.clone(),
                self.config.max_tool_call_args_size,
            ),
            context: options.context,
        };

        // Parsing and validation recurse as deeply as evaluation, so the
        // whole pipeline runs on the worker's stack.
        let front_end = self.front_end();
        let code = code.to_string();
        let rx = on_worker(move || {
            let _permit = permit;
            let program = front_end.compile(&code)?;
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| EnclaveError::Internal(format!("failed to build worker runtime: {e}")))?;
            Ok(rt.block_on(evaluate(&program, env)))
        })?;

        // The governor stops scripts cooperatively; this only fires when a
        // single expression runs past the deadline without reaching a check.
        let backstop = timeout.saturating_add(BACKSTOP_GRACE);
        let evaluation = match tokio::time::timeout(backstop, rx).await {
            Ok(Ok(Ok(evaluation))) => evaluation,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(EnclaveError::Internal("enclave worker thread panicked".into())),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "worker missed the deadline");
                return Err(Budget::WallClock {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into());
            }
        };

        tracing::debug!(tool_calls = evaluation.tool_calls, "evaluation finished");
        evaluation.outcome.map(|value| (value, evaluation.logs))
    }
}

/// Parser and static validator settings for one enclave.
#[derive(Debug, Clone, Copy)]
struct FrontEnd {
    parse: ParseOptions,
    max_nesting_depth: usize,
}

impl FrontEnd {
    fn compile(&self, code: &str) -> Result<Program, EnclaveError> {
        let program = parse_with_options(code, self.parse)?;
        ast_validator::validate(&program, self.max_nesting_depth)?;
        Ok(program)
    }
}

/// Run `job` on a fresh thread with [`WORKER_STACK_SIZE`] of stack and hand
/// back its result. A panic in `job` drops the sender.
fn on_worker<T, F>(job: F) -> Result<oneshot::Receiver<Result<T, EnclaveError>>, EnclaveError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EnclaveError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("codecall-enclave".into())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            if tx.send(job()).is_err() {
                tracing::warn!("enclave result receiver dropped before result was sent");
            }
        })
        .map_err(|e| EnclaveError::Internal(format!("failed to spawn worker thread: {e}")))?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEntry;
    use codecall_error::ToolCallError;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ToolHandler for EchoHandler {
        async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolCallError> {
            match name {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Value::Null)
                }
                _ => Ok(json!({ "tool": name, "args": args })),
            }
        }
    }

    #[derive(Default)]
    struct CollectingLogger {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait::async_trait]
    impl AuditLogger for CollectingLogger {
        async fn log(&self, entry: &AuditEntry) {
            self.entries.lock().await.push(entry.clone());
        }
    }

    fn enclave() -> Enclave {
        Enclave::new(EnclaveConfig::default(), Arc::new(EchoHandler))
    }

    #[tokio::test]
    async fn runs_a_script() {
        let result = enclave()
            .run("const r = await callTool('a', { x: 1 }); return r.args.x + 1;", RunOptions::default())
            .await;
        assert_eq!(result, ExecutionResult::ok(json!(2), Vec::new()));
    }

    #[tokio::test]
    async fn wall_clock_stops_a_busy_loop() {
        let enclave = Enclave::new(
            EnclaveConfig {
                max_total_iterations: u64::MAX,
                ..EnclaveConfig::default()
            },
            Arc::new(EchoHandler),
        );
        let options = RunOptions::default()
            .timeout_ms(50)
            .max_loop_iterations(u64::MAX);
        let start = std::time::Instant::now();
        let result = enclave
            .run("let n = 0; for (let i = 0; i < 1e15; i++) { n += i; } return n;", options)
            .await;
        assert_eq!(result.status(), "timeout");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wall_clock_stops_a_slow_tool() {
        let result = enclave()
            .run("await callTool('slow', {}); return 1;", RunOptions::default().timeout_ms(50))
            .await;
        match result {
            ExecutionResult::Timeout { error } => {
                assert_eq!(error.message, "execution timed out after 50ms")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn options_override_config() {
        let result = enclave()
            .run(
                "for (let i = 0; i < 3; i++) { await callTool('a', {}); }",
                RunOptions::default().max_tool_calls(2),
            )
            .await;
        assert_eq!(result.status(), "timeout");
    }

    #[tokio::test]
    async fn context_is_exposed() {
        let result = enclave()
            .run(
                "return codecallContext.tenant;",
                RunOptions::default().context(json!({ "tenant": "acme" })),
            )
            .await;
        assert_eq!(result, ExecutionResult::ok(json!("acme"), Vec::new()));
    }

    #[tokio::test]
    async fn runs_are_bounded_but_all_complete() {
        let enclave = Arc::new(Enclave::new(
            EnclaveConfig {
                max_concurrent: 1,
                ..EnclaveConfig::default()
            },
            Arc::new(EchoHandler),
        ));
        let runs = (0..4).map(|i| {
            let enclave = enclave.clone();
            async move { enclave.run(&format!("return {i} * 2;"), RunOptions::default()).await }
        });
        let results = futures::future::join_all(runs).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result, ExecutionResult::ok(json!(i * 2), Vec::new()));
        }
    }

    #[tokio::test]
    async fn audit_entry_records_tool_calls() {
        let logger = Arc::new(CollectingLogger::default());
        let enclave = Enclave::with_audit_logger(
            EnclaveConfig::default(),
            Arc::new(EchoHandler),
            logger.clone(),
        );
        enclave
            .run("await callTool('a', {}); await callTool('b', { k: 1 }); return 1;", RunOptions::default())
            .await;
        let entries = logger.entries.lock().await;
        assert_eq!(entries.len(), 1);
        let tools: Vec<&str> = entries[0].tool_calls.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(tools, ["a", "b"]);
        assert_eq!(entries[0].outcome.status(), "ok");
    }

    #[tokio::test]
    async fn rejected_scripts_are_audited_too() {
        let logger = Arc::new(CollectingLogger::default());
        let enclave = Enclave::with_audit_logger(
            EnclaveConfig::default(),
            Arc::new(EchoHandler),
            logger.clone(),
        );
        let result = enclave.run("return process.env;", RunOptions::default()).await;
        assert_eq!(result.status(), "illegal_access");
        let entries = logger.entries.lock().await;
        assert_eq!(entries[0].outcome.status(), "illegal_access");
        assert!(entries[0].tool_calls.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deeply_nested_scripts_are_rejected_off_the_caller_stack() {
        let enclave = Arc::new(enclave());
        let scripts = [
            format!("return {}1;", "!".repeat(255)),
            format!("return {}1;", "- ".repeat(20_000)),
            format!("return {}1;", "x=>".repeat(300)),
            format!("return {}0;", "1?1:".repeat(10_000)),
            format!("return {}1;", "await ".repeat(10_000)),
        ];
        for code in scripts {
            let enclave = enclave.clone();
            let result = tokio::spawn(async move {
                let run = enclave.run(&code, RunOptions::default()).await;
                let check = enclave.check(&code).await;
                (run, check)
            })
            .await
            .unwrap();
            for result in [result.0, result.1] {
                assert!(
                    matches!(result.status(), "syntax_error" | "illegal_access"),
                    "unexpected {result:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn check_validates_without_calling_tools() {
        let logger = Arc::new(CollectingLogger::default());
        let enclave = Enclave::with_audit_logger(
            EnclaveConfig::default(),
            Arc::new(EchoHandler),
            logger.clone(),
        );
        assert!(enclave.check("return await callTool('slow', {});").await.is_ok());
        assert_eq!(enclave.check("return process.env;").await.status(), "illegal_access");
        assert_eq!(enclave.check("while (true) {}").await.status(), "syntax_error");
        assert_eq!(enclave.check("").await.status(), "syntax_error");
        assert!(logger.entries.lock().await.is_empty());
    }

    #[test]
    fn run_options_use_camel_case() {
        let options: RunOptions = serde_json::from_value(json!({
            "allowedTools": ["a"],
            "timeoutMs": 100,
            "maxToolCalls": 3,
            "maxLoopIterations": 10,
        }))
        .unwrap();
        assert_eq!(options.allowed_tools.as_deref(), Some(&["a".to_string()][..]));
        assert_eq!(options.timeout_ms, Some(100));
        assert_eq!(options.max_tool_calls, Some(3));
        assert_eq!(options.max_loop_iterations, Some(10));
        assert_eq!(options.context, None);
    }
}
