// src/auth/validators.rs

use super::models::*;
use crate::common::{ValidationResult, Validator};

pub struct LocalLoginValidator;

impl Validator<LocalBeginRequest> for LocalLoginValidator {
    fn validate(&self, data: &LocalBeginRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.require_email("email", &data.email);
        result
    }
}

impl Validator<LocalVerifyRequest> for LocalLoginValidator {
    fn validate(&self, data: &LocalVerifyRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        result.require_email("email", &data.email);

        let code = data.token.trim();
        if code.is_empty() {
            result.add_error("token", "Verification code is required");
        } else if !code.chars().all(|c| c.is_ascii_digit()) {
            result.add_error("token", "Verification code must be numeric");
        }

        result
    }
}
