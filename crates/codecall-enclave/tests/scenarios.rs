//! End-to-end runs through [`Enclave::run`], covering the documented
//! scenarios and the properties every run must uphold.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codecall_enclave::{Enclave, EnclaveConfig, ExecutionResult, RunOptions, ToolCallError, ToolHandler};
use serde_json::{json, Value};

/// Records every call and answers from a small fixture table.
#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<String>>,
    count: AtomicUsize,
}

impl RecordingHandler {
    fn names(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolHandler for RecordingHandler {
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolCallError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(name.to_string());
        match name {
            "users:get" => Ok(json!({ "id": args["id"], "name": "Ann" })),
            "users:list" => Ok(json!([
                { "id": "1", "name": "Ann", "active": true },
                { "id": "2", "name": "Bob", "active": false },
                { "id": "3", "name": "Cy", "active": true },
            ])),
            "boom" => Err(ToolCallError::Internal(anyhow::anyhow!("boom"))),
            _ => Ok(json!({ "tool": name, "args": args })),
        }
    }
}

fn setup() -> (Enclave, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let enclave = Enclave::new(EnclaveConfig::default(), handler.clone());
    (enclave, handler)
}

async fn run(code: &str) -> ExecutionResult {
    setup().0.run(code, RunOptions::default()).await
}

fn illegal_kind(result: &ExecutionResult) -> &str {
    match result {
        ExecutionResult::IllegalAccess { error } => &error.kind,
        other => panic!("expected illegal_access, got {other:?}"),
    }
}

// --- Scenario A: plain arithmetic ---
#[tokio::test]
async fn scenario_a_returns_a_value() {
    assert_eq!(run("return 1+2;").await, ExecutionResult::ok(json!(3), Vec::new()));
}

// --- Scenario B: while is not part of the language ---
#[tokio::test]
async fn scenario_b_while_is_a_syntax_error() {
    assert_eq!(run("while(true){}").await.status(), "syntax_error");
}

// --- Scenario C: a tool result flows back out ---
#[tokio::test]
async fn scenario_c_tool_result_is_returned() {
    let result = run("const r = await callTool('users:get',{id:'1'}); return r;").await;
    assert_eq!(result, ExecutionResult::ok(json!({ "id": "1", "name": "Ann" }), Vec::new()));
}

// --- Scenario D: forbidden global ---
#[tokio::test]
async fn scenario_d_process_is_illegal() {
    let result = run("return process.env;").await;
    assert_eq!(illegal_kind(&result), "DisallowedGlobal");
}

// --- Scenario E: self-reference wins over the allow-list ---
#[tokio::test]
async fn scenario_e_self_reference_precedes_allow_list() {
    let (enclave, handler) = setup();
    let result = enclave
        .run(
            "return await callTool('codecall:invoke', {}, { throwOnError: false });",
            RunOptions::default().allowed_tools(["a"]),
        )
        .await;
    assert_eq!(illegal_kind(&result), "permission_denied");
    assert!(handler.names().is_empty());
}

// --- P1: forbidden globals fail closed ---
#[tokio::test]
async fn p1_forbidden_globals_never_reach_the_handler() {
    let (enclave, handler) = setup();
    for code in [
        "return process;",
        "return require('fs');",
        "return eval('1');",
        "return Function('return 1')();",
        "setTimeout(() => 1, 0);",
        "return fetch('https://example.com');",
        "return globalThis.callTool;",
        "return window.location;",
        "const p = process.env.HOME; await callTool('a', { p });",
    ] {
        let result = enclave.run(code, RunOptions::default()).await;
        assert_eq!(result.status(), "illegal_access", "{code}");
    }
    assert_eq!(handler.count.load(Ordering::SeqCst), 0);
}

// --- P2: reserved namespace ---
#[tokio::test]
async fn p2_reserved_namespace_is_blocked_before_dispatch() {
    let (enclave, handler) = setup();
    for name in ["codecall:invoke", "CodeCall:run", " codecall:anything"] {
        let code = format!("await callTool({name:?}, {{}}); return 1;");
        let result = enclave.run(&code, RunOptions::default()).await;
        assert_eq!(illegal_kind(&result), "permission_denied", "{name}");
    }
    assert!(handler.names().is_empty());
}

// --- P3: loop budget ---
#[tokio::test]
async fn p3_unbounded_loop_times_out_quickly() {
    let start = Instant::now();
    let result = run("for (let i=0;i<1e9;i++) {}").await;
    match result {
        ExecutionResult::Timeout { error } => {
            assert!(error.message.contains("loop iteration limit"), "{}", error.message)
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn p3_nested_loops_hit_the_total_budget() {
    let result = run(
        "let n = 0; for (let i = 0; i < 1000; i++) { for (let j = 0; j < 1000; j++) { n++; } } return n;",
    )
    .await;
    match result {
        ExecutionResult::Timeout { error } => {
            assert!(error.message.contains("iteration budget"), "{}", error.message)
        }
        other => panic!("unexpected {other:?}"),
    }
}

// --- P4: tool-call quota ---
#[tokio::test]
async fn p4_tool_calls_stop_at_the_quota() {
    let (enclave, handler) = setup();
    let result = enclave
        .run(
            "for (let i = 0; i < 10; i++) { await callTool('a', { i }); } return 'done';",
            RunOptions::default().max_tool_calls(3),
        )
        .await;
    assert_eq!(result.status(), "timeout");
    assert_eq!(handler.count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn p4_calls_at_the_quota_succeed() {
    let (enclave, handler) = setup();
    let result = enclave
        .run(
            "for (let i = 0; i < 3; i++) { await callTool('a', { i }); } return 'done';",
            RunOptions::default().max_tool_calls(3),
        )
        .await;
    assert_eq!(result, ExecutionResult::ok(json!("done"), Vec::new()));
    assert_eq!(handler.count.load(Ordering::SeqCst), 3);
}

// --- P5: allow-list ---
#[tokio::test]
async fn p5_allow_list_blocks_other_tools() {
    let (enclave, handler) = setup();
    let result = enclave
        .run("await callTool('b', {}); return 1;", RunOptions::default().allowed_tools(["a"]))
        .await;
    match result {
        ExecutionResult::ToolError { error } => {
            assert_eq!(error.tool_name, "b");
            assert_eq!(error.code.as_deref(), Some("ACCESS_DENIED"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(handler.names().is_empty());
}

#[tokio::test]
async fn p5_denial_as_envelope() {
    let (enclave, handler) = setup();
    let result = enclave
        .run(
            "const r = await callTool('b', {}, { throwOnError: false }); \
             const ok = await callTool('a', {}); \
             return [r.success, r.error.code, ok.tool];",
            RunOptions::default().allowed_tools(["a"]),
        )
        .await;
    assert_eq!(result, ExecutionResult::ok(json!([false, "ACCESS_DENIED", "a"]), Vec::new()));
    assert_eq!(handler.names(), ["a"]);
}

// --- P6: sanitized output ---
#[tokio::test]
async fn p6_functions_and_cycles_are_stripped() {
    let code = "
        const o = { a: 1, f: () => 1, list: [1, () => 2] };
        o.self = o;
        o.list.push(o.list);
        return o;
    ";
    let result = run(code).await;
    let expected = json!({ "a": 1, "list": [1, null, null] });
    assert_eq!(result, ExecutionResult::ok(expected, Vec::new()));

    let once = serde_json::to_string(&result).unwrap();
    let again: ExecutionResult = serde_json::from_str(&once).unwrap();
    assert_eq!(serde_json::to_string(&again).unwrap(), once);
}

#[tokio::test]
async fn p6_non_finite_numbers_become_null() {
    let result = run("return [1/0, 0/0, -1/0, 2.5];").await;
    assert_eq!(result, ExecutionResult::ok(json!([null, null, null, 2.5]), Vec::new()));
}

#[tokio::test]
async fn p6_large_whole_numbers_serialize_as_integers() {
    let result = run("return [2 ** 53 + 1, -(2 ** 60), 2 ** 64, 1e300];").await;
    match result {
        ExecutionResult::Ok { result, .. } => assert_eq!(
            serde_json::to_string(&result).unwrap(),
            "[9007199254740992,-1152921504606846976,1.8446744073709552e19,1e300]"
        ),
        other => panic!("unexpected {other:?}"),
    }
}

// --- P7: tool error classification ---
#[tokio::test]
async fn p7_tool_failure_is_a_tool_error() {
    let result = run("const r = await callTool('boom', { q: 1 }); return r;").await;
    match result {
        ExecutionResult::ToolError { error } => {
            assert_eq!(error.tool_name, "boom");
            assert_eq!(error.tool_input, json!({ "q": 1 }));
            assert_eq!(error.source, "tool");
            assert!(error.message.contains("boom"));
            assert!(!error.message.contains("src/"), "{}", error.message);
        }
        other => panic!("unexpected {other:?}"),
    }
}

// --- Orchestration ---
#[tokio::test]
async fn filters_and_fans_out() {
    let (enclave, handler) = setup();
    let code = "
        const users = await callTool('users:list', {});
        const active = users.filter(u => u.active);
        const details = await Promise.all(active.map(u => callTool('users:get', { id: u.id })));
        console.log(`found ${details.length} active users`);
        return details.map(d => d.name).join(', ');
    ";
    let result = enclave.run(code, RunOptions::default()).await;
    assert_eq!(
        result,
        ExecutionResult::ok(json!("Ann, Cy"), vec!["found 2 active users".to_string()])
    );
    assert_eq!(handler.names(), ["users:list", "users:get", "users:get"]);
}

#[tokio::test]
async fn console_levels_are_prefixed() {
    let result = run("console.log('a', 1); console.warn('w'); console.error({ e: true }); return null;").await;
    assert_eq!(
        result,
        ExecutionResult::ok(
            json!(null),
            vec!["a 1".to_string(), "[warn] w".to_string(), "[error] {\"e\":true}".to_string()]
        )
    );
}

#[tokio::test]
async fn missing_return_yields_null() {
    assert_eq!(run("const x = 1;").await, ExecutionResult::ok(Value::Null, Vec::new()));
}

#[tokio::test]
async fn thrown_errors_are_runtime_errors() {
    match run("throw new TypeError('bad input');").await {
        ExecutionResult::RuntimeError { error } => {
            assert_eq!(error.name.as_deref(), Some("TypeError"));
            assert_eq!(error.message, "bad input");
            assert_eq!(error.source, "script");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn context_is_read_only() {
    let (enclave, _) = setup();
    let options = RunOptions::default().context(json!({ "user": { "id": 7 } }));
    let result = enclave.run("return codecallContext.user.id * 6;", options.clone()).await;
    assert_eq!(result, ExecutionResult::ok(json!(42), Vec::new()));

    let result = enclave.run("codecallContext.user.id = 1;", options).await;
    match result {
        ExecutionResult::RuntimeError { error } => assert_eq!(error.name.as_deref(), Some("TypeError")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn runs_share_no_state() {
    let (enclave, _) = setup();
    let first = enclave.run("const cache = [1]; return cache.length;", RunOptions::default()).await;
    assert!(first.is_ok());
    let second = enclave.run("return typeof cache;", RunOptions::default()).await;
    assert_eq!(second, ExecutionResult::ok(json!("undefined"), Vec::new()));
    let third = enclave.run("return cache.length;", RunOptions::default()).await;
    match third {
        ExecutionResult::RuntimeError { error } => {
            assert_eq!(error.name.as_deref(), Some("ReferenceError"))
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn code_size_is_checked_before_parsing() {
    let enclave = Enclave::new(
        EnclaveConfig {
            max_code_size: 16,
            ..EnclaveConfig::default()
        },
        Arc::new(RecordingHandler::default()),
    );
    let result = enclave.run("return 'this script is too long';", RunOptions::default()).await;
    assert_eq!(result.status(), "syntax_error");
    assert_eq!(run("   ").await.status(), "syntax_error");
}

#[tokio::test]
async fn large_output_is_rejected() {
    let enclave = Enclave::new(
        EnclaveConfig {
            max_output_size: 64,
            ..EnclaveConfig::default()
        },
        Arc::new(RecordingHandler::default()),
    );
    let result = enclave.run("return 'x'.repeat(100);", RunOptions::default()).await;
    match result {
        ExecutionResult::RuntimeError { error } => assert_eq!(error.name.as_deref(), Some("RangeError")),
        other => panic!("unexpected {other:?}"),
    }
}
