use thiserror::Error;

/// Top-level error type shared by the dine crates.
///
/// Subsystem crates define their own error enums and convert into or out of
/// `DineError` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for DineError {
    fn from(err: toml::de::Error) -> Self {
        DineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DineError {
    fn from(err: toml::ser::Error) -> Self {
        DineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DineError {
    fn from(err: serde_json::Error) -> Self {
        DineError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for dine operations.
pub type Result<T> = std::result::Result<T, DineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DineError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = DineError::Query("unknown collection".to_string());
        assert_eq!(err.to_string(), "Query error: unknown collection");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "fixtures.json");
        let err: DineError = io_err.into();
        assert!(matches!(err, DineError::Io(_)));
        assert!(err.to_string().contains("fixtures.json"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DineError = json_err.into();
        assert!(matches!(err, DineError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: DineError = toml_err.into();
        assert!(matches!(err, DineError::Config(_)));
    }
}
