// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request validation for `POST /api/v1/query`.

const MAX_NL_QUERY_LENGTH: usize = 10_000;

/// Validates incoming query requests before the orchestrator is invoked.
pub struct RequestValidator;

impl RequestValidator {
    /// Validate all fields, accumulating every error found.
    pub fn validate_query_request(user_id: &str, nl_query: &str) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if user_id.trim().is_empty() {
            errors.push("user_id must not be empty".to_string());
        }

        if nl_query.is_empty() {
            errors.push("nl_query must not be empty".to_string());
        } else if nl_query.trim().is_empty() {
            errors.push("nl_query must contain non-whitespace characters".to_string());
        } else if nl_query.len() > MAX_NL_QUERY_LENGTH {
            errors.push(format!("nl_query exceeds maximum length of {MAX_NL_QUERY_LENGTH} characters"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_request_passes() {
        assert!(RequestValidator::validate_query_request("u1", "list all customers").is_ok());
    }

    #[test]
    fn empty_user_id_rejected() {
        assert!(RequestValidator::validate_query_request("", "q").is_err());
    }

    #[test]
    fn empty_nl_query_rejected() {
        assert!(RequestValidator::validate_query_request("u1", "").is_err());
    }

    #[test]
    fn whitespace_only_nl_query_rejected() {
        assert!(RequestValidator::validate_query_request("u1", "   ").is_err());
    }

    #[test]
    fn oversized_nl_query_rejected() {
        let huge = "a".repeat(MAX_NL_QUERY_LENGTH + 1);
        assert!(RequestValidator::validate_query_request("u1", &huge).is_err());
    }

    #[test]
    fn accumulates_every_error() {
        let errors = RequestValidator::validate_query_request("", "").unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
