/// Result alias that carries the custom [`ScopeError`] type.
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// Nothing is loaded for the active playback mode. Playback treats this
    /// as silence; only the exporter ever returns it.
    #[error("no active signal: load an asset or add one to the playlist")]
    NoActiveSignal,
    /// A duration parameter was outside its valid range.
    #[error("invalid {name}: {value}")]
    InvalidDuration { name: &'static str, value: f64 },
    /// Sample rate outside the range the core accepts.
    #[error("invalid sample rate {value} Hz: must be between {min} and {max}")]
    InvalidSampleRate { value: u32, min: u32, max: u32 },
    /// The requested export would not fit into a 32-bit WAV container.
    #[error(
        "export of {requested_seconds}s exceeds the {limit_bytes} byte WAV data limit; \
         at most {max_seconds}s fit at this sample rate"
    )]
    ExportSizeExceeded {
        requested_seconds: f64,
        max_seconds: f64,
        limit_bytes: u64,
    },
    /// Converter output rejected at the signal store boundary.
    #[error("malformed signal: {0}")]
    MalformedSignal(String),
    /// The export was cancelled before it completed.
    #[error("export cancelled")]
    ExportCancelled,
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

impl ScopeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn malformed<T: Into<String>>(reason: T) -> Self {
        Self::MalformedSignal(reason.into())
    }
}

impl From<&str> for ScopeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ScopeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
