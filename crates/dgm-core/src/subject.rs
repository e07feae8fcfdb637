//! Subject grammar and NATS-style wildcard matching.
//!
//! Subjects are dot-separated token lists (`dgm.improvement.proposed`).
//! Patterns may use `*` to match exactly one token and `>` to match one or
//! more trailing tokens. The broker enforces these rules server-side; the
//! in-memory bus and pattern validation need them locally.

use crate::error::{Error, Result};

/// Validate a concrete subject: non-empty, no wildcards, no empty tokens.
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(Error::InvalidPattern("empty subject".to_string()));
    }
    for token in subject.split('.') {
        if token.is_empty() {
            return Err(Error::InvalidPattern(format!(
                "empty token in subject: {subject}"
            )));
        }
        if token == "*" || token == ">" {
            return Err(Error::InvalidPattern(format!(
                "wildcard not allowed in concrete subject: {subject}"
            )));
        }
    }
    Ok(())
}

/// Validate a subscription pattern: wildcards allowed, `>` only terminal.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(Error::InvalidPattern("empty pattern".to_string()));
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(Error::InvalidPattern(format!(
                "empty token in pattern: {pattern}"
            )));
        }
        if *token == ">" && i != tokens.len() - 1 {
            return Err(Error::InvalidPattern(format!(
                "'>' must be the final token: {pattern}"
            )));
        }
    }
    Ok(())
}

/// Returns true if `subject` matches `pattern` under NATS wildcard rules.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');

    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (Some(_), Some(_)) => return false,
            (None, None) => return true,
            // `>` requires at least one remaining token
            (Some(_), None) | (None, Some(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("dgm.improvement.proposed", "dgm.improvement.proposed"));
        assert!(!matches("dgm.improvement.proposed", "dgm.improvement.executed"));
    }

    #[test]
    fn test_star_matches_single_token() {
        assert!(matches("dgm.improvement.*", "dgm.improvement.proposed"));
        assert!(!matches("dgm.improvement.*", "dgm.improvement"));
        assert!(!matches("dgm.performance.*", "dgm.performance.metrics.updated"));
    }

    #[test]
    fn test_gt_matches_remainder() {
        assert!(matches("dgm.>", "dgm.improvement.proposed"));
        assert!(matches("dgm.performance.>", "dgm.performance.metrics.updated"));
        assert!(!matches("dgm.>", "dgm"));
    }

    #[test]
    fn test_pattern_validation() {
        assert!(validate_pattern("dgm.improvement.*").is_ok());
        assert!(validate_pattern("dgm.>").is_ok());
        assert!(validate_pattern("dgm.>.proposed").is_err());
        assert!(validate_pattern("dgm..proposed").is_err());
        assert!(validate_pattern("").is_err());
    }

    #[test]
    fn test_subject_validation() {
        assert!(validate_subject("dgm.improvement.proposed").is_ok());
        assert!(validate_subject("dgm.improvement.*").is_err());
        assert!(validate_subject("dgm.").is_err());
    }
}
