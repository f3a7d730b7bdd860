//! Length and charset checks shared by the keystroke detector, the
//! session controller and the input field.

use crate::error::ValidationError;

/// Trim `raw` and check it against the configured length bounds.
///
/// Returns the trimmed code. Lengths are counted in characters, not bytes.
pub fn validate_code(raw: &str, min_length: usize, max_length: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let length = trimmed.chars().count();

    if length < min_length {
        return Err(ValidationError::TooShort {
            length,
            min: min_length,
        });
    }

    if length > max_length {
        return Err(ValidationError::TooLong {
            length,
            max: max_length,
        });
    }

    if !trimmed.chars().any(char::is_alphanumeric) {
        return Err(ValidationError::InvalidFormat);
    }

    Ok(trimmed.to_string())
}

/// Bounds applied by [`validate_code`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        validate_code(raw, self.min, self.max)
    }
}

impl Default for LengthBounds {
    fn default() -> Self {
        Self { min: 3, max: 50 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ean_is_trimmed() {
        let code = validate_code("  7501234567890 \n", 3, 50).unwrap();
        assert_eq!(code, "7501234567890");
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            validate_code("ab", 3, 50),
            Err(ValidationError::TooShort { length: 2, min: 3 })
        );
        // whitespace does not count towards the length
        assert!(matches!(
            validate_code("  a  ", 3, 50),
            Err(ValidationError::TooShort { length: 1, .. })
        ));
    }

    #[test]
    fn test_too_long() {
        let raw = "9".repeat(51);
        assert_eq!(
            validate_code(&raw, 3, 50),
            Err(ValidationError::TooLong { length: 51, max: 50 })
        );
        assert!(validate_code(&"9".repeat(50), 3, 50).is_ok());
    }

    #[test]
    fn test_requires_alphanumeric() {
        assert_eq!(validate_code("----", 3, 50), Err(ValidationError::InvalidFormat));
        assert_eq!(validate_code("-A-", 3, 50).unwrap(), "-A-");
    }

    #[test]
    fn test_length_bounds_default() {
        let bounds = LengthBounds::default();
        assert_eq!(bounds.min, 3);
        assert_eq!(bounds.max, 50);
        assert!(bounds.validate("ABC").is_ok());
    }
}
