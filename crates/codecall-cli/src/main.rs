#![warn(missing_docs)]

//! codecall: run an orchestration script in the enclave against JSON tool
//! fixtures and print the result.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codecall_config::CodecallConfig;
use codecall_enclave::audit::{AuditLogger, JsonLinesAuditLogger, TracingAuditLogger};
use codecall_enclave::{Enclave, ExecutionResult, RunOptions, ToolCallError, ToolHandler};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "codecall", author, version, about, long_about = None)]
struct Cli {
    /// Script to run, or `-` for stdin
    script: PathBuf,

    /// Config file (defaults to $CODECALL_CONFIG, then ./codecall.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file mapping tool names to canned responses
    #[arg(short, long)]
    tools: Option<PathBuf>,

    /// Allow only this tool (repeatable); overrides the config allow-list
    #[arg(long = "allow", value_name = "TOOL")]
    allowed_tools: Vec<String>,

    /// JSON value exposed to the script as `codecallContext`
    #[arg(long)]
    context: Option<String>,

    /// Wall-clock budget in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum tool calls
    #[arg(long)]
    max_tool_calls: Option<usize>,

    /// Only parse and validate; do not run
    #[arg(long)]
    check: bool,

    /// Pretty-print the result
    #[arg(long)]
    pretty: bool,
}

/// One canned tool answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
enum Fixture {
    /// The call succeeds with this value.
    Result(Value),
    /// The call fails.
    Error {
        code: String,
        message: String,
        #[serde(default)]
        details: Option<Value>,
    },
}

/// Answers tool calls from a fixture table.
///
/// ```json
/// {
///   "users:get": { "result": { "id": "1", "name": "Ann" } },
///   "db:query": { "error": { "code": "UPSTREAM_ERROR", "message": "down" } }
/// }
/// ```
struct FixtureHandler {
    fixtures: HashMap<String, Fixture>,
}

impl FixtureHandler {
    fn from_json(json: &str) -> Result<Self> {
        let fixtures = serde_json::from_str(json).context("invalid tool fixtures")?;
        Ok(Self { fixtures })
    }

    fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool fixtures from {}", path.display()))?;
        Self::from_json(&json)
    }

    fn empty() -> Self {
        Self {
            fixtures: HashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for FixtureHandler {
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolCallError> {
        tracing::debug!(tool = %name, %args, "fixture call");
        match self.fixtures.get(name) {
            Some(Fixture::Result(value)) => Ok(value.clone()),
            Some(Fixture::Error {
                code,
                message,
                details,
            }) => Err(ToolCallError::Custom {
                code: code.clone(),
                message: message.clone(),
                details: details.clone(),
            }),
            None => Err(ToolCallError::NotFound(name.to_string())),
        }
    }
}

/// Locate the config file.
///
/// Search order:
/// 1. `--config`
/// 2. `CODECALL_CONFIG` environment variable
/// 3. `./codecall.toml` in the current directory
/// 4. None (defaults apply)
fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("CODECALL_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }
    let cwd = PathBuf::from("codecall.toml");
    cwd.exists().then_some(cwd)
}

fn load_config(explicit: Option<&Path>) -> Result<CodecallConfig> {
    match find_config_file(explicit) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            CodecallConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(CodecallConfig::default())
        }
    }
}

fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read script from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))
}

/// Apply command-line overrides on top of the configured run options.
fn run_options(cli: &Cli, config: &CodecallConfig) -> Result<RunOptions> {
    let mut options = config.run_options();
    if !cli.allowed_tools.is_empty() {
        options.allowed_tools = Some(cli.allowed_tools.clone());
    }
    if let Some(context) = &cli.context {
        let value: Value = serde_json::from_str(context).context("--context is not valid JSON")?;
        options.context = Some(value);
    }
    options.timeout_ms = cli.timeout_ms.or(options.timeout_ms);
    options.max_tool_calls = cli.max_tool_calls.or(options.max_tool_calls);
    Ok(options)
}

async fn audit_logger(config: &CodecallConfig) -> Result<Arc<dyn AuditLogger>> {
    let Some(path) = &config.audit.path else {
        return Ok(Arc::new(TracingAuditLogger));
    };
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open audit log {}", path.display()))?;
    Ok(Arc::new(JsonLinesAuditLogger::new(file)))
}

fn exit_code(result: &ExecutionResult) -> ExitCode {
    match result {
        ExecutionResult::Ok { .. } => ExitCode::SUCCESS,
        _ => ExitCode::from(2),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let enclave_config = config.enclave_config();
    let code = read_script(&cli.script)?;

    let result = if cli.check {
        Enclave::new(enclave_config, Arc::new(FixtureHandler::empty()))
            .check(&code)
            .await
    } else {
        let handler: Arc<dyn ToolHandler> = match &cli.tools {
            Some(path) => Arc::new(FixtureHandler::load(path)?),
            None => Arc::new(FixtureHandler::empty()),
        };
        let options = run_options(&cli, &config)?;
        let enclave = Enclave::with_audit_logger(enclave_config, handler, audit_logger(&config).await?);
        enclave.run(&code, options).await
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{rendered}");
    Ok(exit_code(&result))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli).await
}
