use thiserror::Error;

/// Main error type for the audio core
#[derive(Error, Debug)]
pub enum AudioError {
    /// A setup-time configuration that can never work (e.g. an M:N channel remap)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed container header or missing data region
    #[error("Parse error: {0}")]
    Parse(String),

    /// A well-formed container holding something other than linear PCM
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// An external encoder or decoder process failed
    #[error("Process error: {0}")]
    Process(String),

    /// A reader was lapped by the producer; its next chunk has been overwritten
    #[error("Stream desynchronized: expected chunk {expected}, oldest retained is {oldest}")]
    Desynchronized { expected: u64, oldest: u64 },

    /// The frame splitter filled its scan buffer without confirming a header
    #[error("No frame synchronization found in {0} bytes")]
    NoFrameSync(usize),

    /// The chunker was closed because of an upstream failure
    #[error("Stream closed: {0}")]
    Closed(String),

    /// The catalog has nothing to play
    #[error("No performances found in the library")]
    EmptyCatalog,

    /// A requested performance does not exist
    #[error("Performance not found: {0}")]
    NotFound(String),

    /// Parts of one performance disagree on their stream format
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error categories, used to decide what is fatal and what is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Parse,
    Process,
    Desync,
    Transient,
    Closed,
}

impl AudioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::Config(_) => ErrorKind::Configuration,
            AudioError::Parse(_) | AudioError::UnsupportedFormat(_) => ErrorKind::Parse,
            AudioError::Process(_) | AudioError::NoFrameSync(_) => ErrorKind::Process,
            AudioError::Desynchronized { .. } => ErrorKind::Desync,
            AudioError::Closed(_) => ErrorKind::Closed,
            AudioError::EmptyCatalog => ErrorKind::Configuration,
            AudioError::NotFound(_) | AudioError::FormatMismatch(_) | AudioError::Io(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Convert into an `io::Error` for use behind `Read`/`Write` impls.
    pub fn into_io(self) -> std::io::Error {
        match self {
            AudioError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }

    /// Recover an `AudioError` that travelled through an `io::Error`.
    pub fn from_io(err: std::io::Error) -> Self {
        if err
            .get_ref()
            .map(|inner| inner.is::<AudioError>())
            .unwrap_or(false)
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(audio) = inner.downcast::<AudioError>() {
                    return *audio;
                }
            }
            return AudioError::Closed("unrecoverable io error".to_string());
        }
        AudioError::Io(err)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AudioError>;
