//! Error types shared across the import pipeline

use thiserror::Error;

/// Terminal failure to classify a filename. The input is routed to the
/// rejects area and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unrecognized filename format: {filename}")]
    UnrecognizedFormat { filename: String },

    #[error("unknown quality [{label}] in {filename}")]
    UnknownQuality { filename: String, label: String },
}

impl ParseError {
    /// Short label used as the rejects subdirectory name
    pub fn reject_label(&self) -> &'static str {
        match self {
            ParseError::UnrecognizedFormat { .. } => "unrecognized format",
            ParseError::UnknownQuality { .. } => "unknown quality",
        }
    }
}

/// Failures surfaced by the import pipeline after a filename parsed
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("lease unavailable for {key}")]
    LeaseUnavailable { key: String },

    #[error("catalog transaction failed: {0:#}")]
    CatalogTransaction(anyhow::Error),

    #[error("catalog error: {0:#}")]
    Catalog(anyhow::Error),

    #[error("quality label not in quality table: {0}")]
    UnknownQuality(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    /// Whether the whole import should be attempted again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ImportError::LeaseUnavailable { .. } | ImportError::CatalogTransaction(_)
        )
    }
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_messages() {
        let err = ParseError::UnknownQuality {
            filename: "Alien (1979) [VHS].mkv".to_string(),
            label: "VHS".to_string(),
        };
        assert_eq!(err.to_string(), "unknown quality [VHS] in Alien (1979) [VHS].mkv");
        assert_eq!(err.reject_label(), "unknown quality");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ImportError::LeaseUnavailable { key: "movie:alien:1979".into() }.is_retryable());
        assert!(ImportError::CatalogTransaction(anyhow::anyhow!("locked")).is_retryable());
        assert!(!ImportError::UnknownQuality("VHS".into()).is_retryable());
    }
}
