//! Source-level checks that run before the script is tokenized.
//!
//! These reject input the parser should never see: oversized scripts,
//! empty scripts and bracket nesting deep enough to exhaust the parser's
//! stack. Everything past this point works on the AST.

use crate::error::EnclaveError;

/// Default maximum code size in bytes (64 KB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Maximum bracket nesting accepted before parsing.
pub const MAX_BRACKET_DEPTH: usize = 256;

/// Validates a script's source text before parsing.
pub fn validate_code(code: &str, max_size: Option<usize>) -> Result<(), EnclaveError> {
    let max = max_size.unwrap_or(DEFAULT_MAX_CODE_SIZE);

    if code.len() > max {
        return Err(EnclaveError::CodeTooLarge {
            max,
            actual: code.len(),
        });
    }

    if code.trim().is_empty() {
        return Err(EnclaveError::syntax("code is empty"));
    }

    check_nesting_depth(code)
}

/// Check nesting depth of brackets, braces and parens before parsing.
///
/// Counts raw characters, including those inside strings and comments, so
/// the bound is conservative.
pub fn check_nesting_depth(code: &str) -> Result<(), EnclaveError> {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    for ch in code.chars() {
        match ch {
            '{' | '[' | '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            '}' | ']' | ')' => {
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }
    if max_depth > MAX_BRACKET_DEPTH {
        return Err(EnclaveError::syntax(format!(
            "nesting depth {max_depth} exceeds maximum {MAX_BRACKET_DEPTH}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_script() {
        let code = r#"const users = await callTool("users:list", {}); return users.length;"#;
        assert!(validate_code(code, None).is_ok());
    }

    #[test]
    fn rejects_empty_code() {
        assert!(matches!(
            validate_code("", None),
            Err(EnclaveError::Syntax { .. })
        ));
        assert!(validate_code("  \n\t ", None).is_err());
    }

    #[test]
    fn rejects_oversized_code() {
        let big = "x".repeat(100_000);
        let err = validate_code(&big, None).unwrap_err();
        assert!(matches!(err, EnclaveError::CodeTooLarge { .. }));
    }

    #[test]
    fn custom_max_size() {
        let code = "x".repeat(100);
        assert!(validate_code(&code, Some(50)).is_err());
        assert!(validate_code(&code, Some(200)).is_ok());
    }

    #[test]
    fn nesting_exactly_at_limit_ok() {
        let code = format!("{}{}", "(".repeat(MAX_BRACKET_DEPTH), ")".repeat(MAX_BRACKET_DEPTH));
        assert!(check_nesting_depth(&code).is_ok());
    }

    #[test]
    fn nesting_over_limit_rejected() {
        let code = format!(
            "{}{}",
            "[".repeat(MAX_BRACKET_DEPTH + 1),
            "]".repeat(MAX_BRACKET_DEPTH + 1)
        );
        let err = check_nesting_depth(&code).unwrap_err();
        assert!(err.to_string().contains("nesting depth 257"));
    }
}
