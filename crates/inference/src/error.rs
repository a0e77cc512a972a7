use preprocess::TargetSize;
use thiserror::Error;

/// Caller bugs surfaced before any per-image work starts. Everything else is
/// absorbed by the per-image failure boundary and reported on the record.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid inference size {0:?}: dimensions must be non-zero")]
    InvalidImageSize(TargetSize),

    #[error("detection threshold {0} outside (0, 1]")]
    InvalidThreshold(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = ConfigError::InvalidImageSize(TargetSize::Square(0));
        assert!(
            err.to_string().contains("dimensions must be non-zero"),
            "InvalidImageSize should explain the constraint"
        );

        let err = ConfigError::InvalidThreshold(1.5);
        assert_eq!(err.to_string(), "detection threshold 1.5 outside (0, 1]");
    }
}
