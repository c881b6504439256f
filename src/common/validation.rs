// Common validation types and traits

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*$")
        .expect("email pattern is a valid regex")
});

#[derive(Debug)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, field: &str, message: &str) {
        self.is_valid = false;
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    /// Records an error on `field` unless `value` is a well-formed email address
    pub fn require_email(&mut self, field: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.add_error(field, "Email is required");
        } else if value.len() > 254 || !EMAIL_RE.is_match(value) {
            self.add_error(field, "Email must be a valid address");
        }
    }

    /// Converts into `Err(self)` when any error was recorded
    pub fn into_result(self) -> Result<(), ValidationResult> {
        if self.is_valid {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Validator<T> {
    fn validate(&self, data: &T) -> ValidationResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_email() {
        let mut result = ValidationResult::new();
        result.require_email("email", "a@b.com");
        assert!(result.is_valid);

        for bad in ["", "   ", "plainaddress", "a@", "@b.com", "a b@c.com"] {
            let mut result = ValidationResult::new();
            result.require_email("email", bad);
            assert!(!result.is_valid, "{:?} should be rejected", bad);
            assert_eq!(result.errors[0].field, "email");
        }
    }
}
