use crate::config::UploadConfig;
use thiserror::Error;

/// Reasons an upload request is refused before any side effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Content type not allowed: {0}")]
    ContentTypeNotAllowed(String),

    #[error("File size must be between 1 and {max} bytes, got {actual}")]
    InvalidSize { actual: i64, max: i64 },
}

/// Exact-match membership in the allow-list
pub fn is_allowed_content_type(mime_type: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|a| a == mime_type)
}

/// True iff `0 < size <= max_size`
pub fn is_valid_size(size: i64, max_size: i64) -> bool {
    size > 0 && size <= max_size
}

/// Client-declared metadata checks applied to every upload request
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_content_types: Vec<String>,
    max_file_size_bytes: i64,
}

impl UploadPolicy {
    pub fn new(allowed_content_types: Vec<String>, max_file_size_bytes: i64) -> Self {
        Self {
            allowed_content_types,
            max_file_size_bytes,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.allowed_content_types.clone(),
            config.max_file_size_bytes,
        )
    }

    /// Check declared values only. The file name is never inspected, so its
    /// extension may disagree with the content type.
    pub fn check(&self, content_type: &str, file_size: i64) -> Result<(), ValidationError> {
        if !is_allowed_content_type(content_type, &self.allowed_content_types) {
            return Err(ValidationError::ContentTypeNotAllowed(
                content_type.to_string(),
            ));
        }

        if !is_valid_size(file_size, self.max_file_size_bytes) {
            return Err(ValidationError::InvalidSize {
                actual: file_size,
                max: self.max_file_size_bytes,
            });
        }

        Ok(())
    }
}
