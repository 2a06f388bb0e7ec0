//! Operator identity, read from the environment.
//!
//! Authentication happens upstream; this crate only needs an opaque string to
//! stamp `created_by` and `performed_by`.

use crate::errors::{Error, Result};

/// Environment variable holding the current operator identity.
pub const OPERATOR_ENV_VAR: &str = "VOUCHER_OPERATOR";

/// Resolves the acting operator: an explicit value wins over `VOUCHER_OPERATOR`.
///
/// Blank identities are rejected so nothing is ever written anonymously.
pub fn resolve_operator(explicit: Option<&str>) -> Result<String> {
    let candidate = match explicit {
        Some(value) => value.to_string(),
        None => std::env::var(OPERATOR_ENV_VAR).map_err(|_| Error::Config {
            message: format!("No operator identity: pass --operator or set {OPERATOR_ENV_VAR}"),
        })?,
    };

    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(Error::Config {
            message: "Operator identity cannot be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_explicit_operator_is_trimmed() {
        assert_eq!(resolve_operator(Some("  alice ")).unwrap(), "alice");
    }

    #[test]
    fn test_blank_operator_is_rejected() {
        let result = resolve_operator(Some("   "));
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
