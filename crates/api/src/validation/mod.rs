//! Upload validation at the API boundary.

/// Content types the profiler can process.
pub(crate) const ALLOWED_UPLOAD_CONTENT_TYPES: &[&str] = &["text/csv", "application/json"];

const MAX_NAME_LENGTH: usize = 200;

/// The declared content type must match the allowlist exactly (parameters
/// such as charset are ignored).
pub(crate) fn is_supported_content_type(content_type: &mime::Mime) -> bool {
    ALLOWED_UPLOAD_CONTENT_TYPES.contains(&content_type.essence_str())
}

pub(crate) fn validate_dataset_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Dataset name must not be empty".to_string());
    }
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "Dataset name must be at most {MAX_NAME_LENGTH} characters"
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err("Dataset name must not contain control characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_content_types() {
        assert!(is_supported_content_type(&"text/csv".parse().unwrap()));
        assert!(is_supported_content_type(
            &"text/csv; charset=utf-8".parse().unwrap()
        ));
        assert!(is_supported_content_type(
            &"application/json".parse().unwrap()
        ));

        assert!(!is_supported_content_type(&"text/plain".parse().unwrap()));
        assert!(!is_supported_content_type(
            &"application/pdf".parse().unwrap()
        ));
        assert!(!is_supported_content_type(
            &"application/octet-stream".parse().unwrap()
        ));
    }

    #[test]
    fn test_validate_dataset_name() {
        assert!(validate_dataset_name("sales q3").is_ok());
        assert!(validate_dataset_name("  padded  ").is_ok());

        assert!(validate_dataset_name("").is_err());
        assert!(validate_dataset_name("   ").is_err());
        assert!(validate_dataset_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
        assert!(validate_dataset_name("bad\u{0007}name").is_err());
    }
}
