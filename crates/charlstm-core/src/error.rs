use thiserror::Error;

/// Errors that can occur while building, running or persisting the classifier.
#[derive(Debug, Error)]
pub enum CharLstmError {
    /// A minibatch with no samples was requested.
    #[error("cannot build a feed from an empty batch")]
    EmptyBatch,

    /// Training was started without any training samples.
    #[error("dataset is empty")]
    EmptyDataset,

    /// The classifier was configured without labels.
    #[error("label set is empty")]
    EmptyLabelSet,

    /// A target label is not part of the classifier's label set.
    #[error("unknown label: {0:?}")]
    UnknownLabel(String),

    /// Two parallel collections differ in length.
    #[error("length mismatch: {texts} texts but {labels} labels")]
    LengthMismatch {
        /// Number of input strings.
        texts: usize,
        /// Number of target labels.
        labels: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A checkpoint or config file could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// The computation graph is missing a parameter it expects.
    #[error("model consistency error: {0}")]
    Consistency(String),

    /// Candle ML framework error.
    #[error("ML framework error: {0}")]
    Candle(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<candle_core::Error> for CharLstmError {
    fn from(err: candle_core::Error) -> Self {
        CharLstmError::Candle(err.to_string())
    }
}

/// Result type alias for classifier operations.
pub type Result<T> = std::result::Result<T, CharLstmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = CharLstmError::EmptyBatch;
        assert_eq!(err.to_string(), "cannot build a feed from an empty batch");

        let err = CharLstmError::UnknownLabel("spam".into());
        assert!(err.to_string().contains("spam"));

        let err = CharLstmError::LengthMismatch { texts: 3, labels: 2 };
        assert_eq!(err.to_string(), "length mismatch: 3 texts but 2 labels");
    }

    #[test]
    fn candle_errors_are_stringified() {
        let err: CharLstmError = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(err, CharLstmError::Candle(ref m) if m.contains("boom")));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CharLstmError>();
    }
}
