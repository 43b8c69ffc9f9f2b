#![warn(missing_docs)]

//! # codecall-config
//!
//! Configuration loading for the codecall enclave.
//!
//! Supports TOML configuration files with environment variable expansion.
//! Every field is optional; anything left out keeps the
//! [`EnclaveConfig`] default.
//!
//! ## Example
//!
//! ```toml
//! [enclave]
//! timeout_ms = 30000
//! max_tool_calls = 100
//! max_loop_iterations = 10000
//! max_concurrent = 8
//! allowed_tools = ["users:get", "users:list"]
//! reserved_tool_prefixes = ["codecall:"]
//!
//! [audit]
//! path = "${CODECALL_AUDIT_DIR}/audit.jsonl"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use codecall_enclave::{EnclaveConfig, RunOptions};
use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodecallConfig {
    /// Enclave limits and tool policy.
    #[serde(default)]
    pub enclave: EnclaveOverrides,

    /// Audit trail settings.
    #[serde(default)]
    pub audit: AuditSettings,
}

/// Overrides for [`EnclaveConfig`]. `None` keeps the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnclaveOverrides {
    /// Wall-clock budget per run, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Maximum tool calls per run.
    #[serde(default)]
    pub max_tool_calls: Option<usize>,

    /// Maximum iterations of a single loop.
    #[serde(default)]
    pub max_loop_iterations: Option<u64>,

    /// Maximum loop iterations plus closure calls per run.
    #[serde(default)]
    pub max_total_iterations: Option<u64>,

    /// Maximum closure call depth.
    #[serde(default)]
    pub max_call_depth: Option<usize>,

    /// Maximum script size in bytes.
    #[serde(default)]
    pub max_code_size: Option<usize>,

    /// Maximum statement/expression nesting.
    #[serde(default)]
    pub max_nesting_depth: Option<usize>,

    /// Maximum serialized result size in bytes.
    #[serde(default)]
    pub max_output_size: Option<usize>,

    /// Maximum serialized tool-argument size in bytes.
    #[serde(default)]
    pub max_tool_call_args_size: Option<usize>,

    /// Maximum string length in bytes.
    #[serde(default)]
    pub max_string_length: Option<usize>,

    /// Maximum array length.
    #[serde(default)]
    pub max_array_length: Option<usize>,

    /// Allocation budget per run, in megabytes.
    #[serde(default)]
    pub max_allocated_mb: Option<usize>,

    /// Maximum captured console entries.
    #[serde(default)]
    pub max_log_entries: Option<usize>,

    /// Maximum characters per console entry.
    #[serde(default)]
    pub max_log_entry_len: Option<usize>,

    /// Maximum concurrent runs.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Tool-name prefixes scripts may never call.
    #[serde(default)]
    pub reserved_tool_prefixes: Option<Vec<String>>,

    /// Parse excluded loop and function syntax so it is reported as
    /// `illegal_access` instead of `syntax_error`.
    #[serde(default)]
    pub permissive_parse: Option<bool>,

    /// Default allow-list for runs that do not pass their own.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
}

/// Where audit entries go.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSettings {
    /// Append JSON lines to this file. Unset means audit entries only go
    /// to the tracing log.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CodecallConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: CodecallConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.enclave;
        let positive: [(&str, Option<u64>); 9] = [
            ("timeout_ms", e.timeout_ms),
            ("max_tool_calls", e.max_tool_calls.map(|n| n as u64)),
            ("max_loop_iterations", e.max_loop_iterations),
            ("max_total_iterations", e.max_total_iterations),
            ("max_call_depth", e.max_call_depth.map(|n| n as u64)),
            ("max_code_size", e.max_code_size.map(|n| n as u64)),
            ("max_nesting_depth", e.max_nesting_depth.map(|n| n as u64)),
            ("max_output_size", e.max_output_size.map(|n| n as u64)),
            ("max_concurrent", e.max_concurrent.map(|n| n as u64)),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "enclave.{name} must be greater than 0"
                )));
            }
        }

        if let Some(prefixes) = &e.reserved_tool_prefixes {
            if prefixes.is_empty() || prefixes.iter().any(|p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "enclave.reserved_tool_prefixes must list at least one non-empty prefix"
                        .into(),
                ));
            }
        }

        if let Some(tools) = &e.allowed_tools {
            if let Some(blank) = tools.iter().find(|t| t.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "enclave.allowed_tools contains an empty tool name: {blank:?}"
                )));
            }
        }
        Ok(())
    }

    /// Build the enclave configuration, falling back to defaults.
    pub fn enclave_config(&self) -> EnclaveConfig {
        let e = &self.enclave;
        let d = EnclaveConfig::default();
        EnclaveConfig {
            timeout: e.timeout_ms.map(Duration::from_millis).unwrap_or(d.timeout),
            max_tool_calls: e.max_tool_calls.unwrap_or(d.max_tool_calls),
            max_loop_iterations: e.max_loop_iterations.unwrap_or(d.max_loop_iterations),
            max_total_iterations: e.max_total_iterations.unwrap_or(d.max_total_iterations),
            max_call_depth: e.max_call_depth.unwrap_or(d.max_call_depth),
            max_code_size: e.max_code_size.unwrap_or(d.max_code_size),
            max_nesting_depth: e.max_nesting_depth.unwrap_or(d.max_nesting_depth),
            max_output_size: e.max_output_size.unwrap_or(d.max_output_size),
            max_tool_call_args_size: e
                .max_tool_call_args_size
                .unwrap_or(d.max_tool_call_args_size),
            max_string_length: e.max_string_length.unwrap_or(d.max_string_length),
            max_array_length: e.max_array_length.unwrap_or(d.max_array_length),
            max_allocated_bytes: e
                .max_allocated_mb
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(d.max_allocated_bytes),
            max_log_entries: e.max_log_entries.unwrap_or(d.max_log_entries),
            max_log_entry_len: e.max_log_entry_len.unwrap_or(d.max_log_entry_len),
            max_concurrent: e.max_concurrent.unwrap_or(d.max_concurrent),
            reserved_tool_prefixes: e
                .reserved_tool_prefixes
                .clone()
                .unwrap_or(d.reserved_tool_prefixes),
            permissive_parse: e.permissive_parse.unwrap_or(d.permissive_parse),
        }
    }

    /// Run options carrying the configured default allow-list.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            allowed_tools: self.enclave.allowed_tools.clone(),
            ..RunOptions::default()
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                // unresolved placeholders stay as written
                Err(_) => result.push_str(&format!("${{{var_name}}}")),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_empty_is_all_defaults() {
        let config = CodecallConfig::from_toml("").unwrap();
        assert_eq!(config.enclave_config(), EnclaveConfig::default());
        assert_eq!(config.run_options(), RunOptions::default());
        assert!(config.audit.path.is_none());
    }

    #[test]
    fn config_parses_enclave_overrides() {
        let toml = r#"
            [enclave]
            timeout_ms = 5000
            max_tool_calls = 10
            max_loop_iterations = 500
            max_concurrent = 2
            max_allocated_mb = 16
            permissive_parse = true
        "#;

        let config = CodecallConfig::from_toml(toml).unwrap().enclave_config();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_tool_calls, 10);
        assert_eq!(config.max_loop_iterations, 500);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.max_allocated_bytes, 16 * 1024 * 1024);
        assert!(config.permissive_parse);
        assert_eq!(config.max_total_iterations, 100_000);
        assert_eq!(config.reserved_tool_prefixes, vec!["codecall:".to_string()]);
    }

    #[test]
    fn config_allow_list_becomes_run_options() {
        let toml = r#"
            [enclave]
            allowed_tools = ["users:get", "users:list"]
        "#;

        let options = CodecallConfig::from_toml(toml).unwrap().run_options();
        assert_eq!(
            options.allowed_tools,
            Some(vec!["users:get".to_string(), "users:list".to_string()])
        );
        assert_eq!(options.timeout_ms, None);
    }

    #[test]
    fn config_expands_environment_variables() {
        std::env::set_var("CODECALL_TEST_AUDIT_DIR", "/var/log/codecall");
        let toml = r#"
            [audit]
            path = "${CODECALL_TEST_AUDIT_DIR}/audit.jsonl"
        "#;

        let config = CodecallConfig::from_toml_with_env(toml).unwrap();
        assert_eq!(
            config.audit.path.as_deref(),
            Some(Path::new("/var/log/codecall/audit.jsonl"))
        );
        std::env::remove_var("CODECALL_TEST_AUDIT_DIR");
    }

    #[test]
    fn config_rejects_zero_limits() {
        for field in ["timeout_ms", "max_tool_calls", "max_concurrent", "max_code_size"] {
            let toml = format!("[enclave]\n{field} = 0\n");
            let err = CodecallConfig::from_toml(&toml).unwrap_err();
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn config_rejects_empty_reserved_prefixes() {
        let err = CodecallConfig::from_toml("[enclave]\nreserved_tool_prefixes = []\n").unwrap_err();
        assert!(err.to_string().contains("reserved_tool_prefixes"), "{err}");

        let err =
            CodecallConfig::from_toml("[enclave]\nreserved_tool_prefixes = [\" \"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn config_rejects_blank_allowed_tool() {
        let err = CodecallConfig::from_toml("[enclave]\nallowed_tools = [\"a\", \"\"]\n").unwrap_err();
        assert!(err.to_string().contains("allowed_tools"), "{err}");
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let err = CodecallConfig::from_toml("[enclave]\ntimeout_secs = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn config_rejects_wrong_types() {
        let err = CodecallConfig::from_toml("[enclave]\nmax_tool_calls = \"ten\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[enclave]\nmax_tool_calls = 7").unwrap();

        let config = CodecallConfig::from_file(file.path()).unwrap();
        assert_eq!(config.enclave_config().max_tool_calls, 7);
    }

    #[test]
    fn config_missing_file_is_io_error() {
        let err = CodecallConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_var_expansion_preserves_unresolved() {
        let result = expand_env_vars("prefix ${DEFINITELY_NOT_SET_12345} suffix");
        assert_eq!(result, "prefix ${DEFINITELY_NOT_SET_12345} suffix");
    }

    #[test]
    fn env_var_expansion_handles_no_vars() {
        assert_eq!(expand_env_vars("no variables here"), "no variables here");
    }
}
