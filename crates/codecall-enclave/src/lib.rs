#![warn(missing_docs)]

//! # codecall-enclave
//!
//! Sandboxed interpreter for AI-generated tool orchestration scripts.
//!
//! Scripts are written in a small JavaScript subset: `const`/`let`, arrow
//! functions, `for`/`for...of`, `if`, template literals, object and array
//! literals, and `await callTool(name, args)`. The only way out of the
//! enclave is [`ToolHandler`].
//!
//! ## Security model
//!
//! - **Tree-walking evaluation**: scripts never reach a host JS engine
//! - **No ambient capabilities**: only allow-listed globals exist
//! - **Fresh state per run**: no scope, heap or counter survives a run
//! - **Pre-execution validation**: banned constructs and identifiers are
//!   rejected before anything runs
//! - **Budgets**: wall clock, loop iterations, tool calls and memory
//! - **Sanitized output**: results are plain JSON with no host references
//!
//! ```no_run
//! use std::sync::Arc;
//! use codecall_enclave::{Enclave, EnclaveConfig, FnToolHandler, RunOptions};
//!
//! # async fn demo() {
//! let handler = Arc::new(FnToolHandler::new(|_name, args| Ok(args)));
//! let enclave = Enclave::new(EnclaveConfig::default(), handler);
//! let result = enclave
//!     .run("const r = await callTool('echo', { n: 1 }); return r.n;", RunOptions::default())
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

pub mod ast;
pub mod ast_validator;
pub mod audit;
pub(crate) mod bridge;
pub mod error;
pub mod executor;
pub mod governor;
mod interpreter;
pub mod lexer;
pub mod numeric;
pub mod parser;
pub mod redact;
pub mod result;
pub mod sanitize;
pub mod validator;

pub use codecall_error::ToolCallError;
pub use error::EnclaveError;
pub use executor::{Enclave, EnclaveConfig, RunOptions};
pub use result::ExecutionResult;

/// Host side of `callTool`.
///
/// Implementations own credentials and connections. Scripts only ever see
/// the JSON a call returns.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Call `name` with `args`.
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError>;
}

/// A [`ToolHandler`] backed by a synchronous closure.
pub struct FnToolHandler<F> {
    f: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&str, serde_json::Value) -> Result<serde_json::Value, ToolCallError> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait::async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&str, serde_json::Value) -> Result<serde_json::Value, ToolCallError> + Send + Sync,
{
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        (self.f)(name, args)
    }
}

const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Enclave>();
};
