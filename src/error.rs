use thiserror::Error;

/// Main error type for Quiver operations
#[derive(Error, Debug)]
pub enum QuiverError {
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quiver operations
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    /// Check if this error indicates unrecoverable on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, QuiverError::CorruptSegment(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuiverError::DimensionMismatch {
            expected: 8,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Vector dimension mismatch: expected 8, got 4"
        );
    }

    #[test]
    fn test_corruption_classification() {
        assert!(QuiverError::CorruptSegment("bad count".to_string()).is_corruption());
        assert!(!QuiverError::UnsupportedConfiguration("2 bits".to_string()).is_corruption());
    }
}
