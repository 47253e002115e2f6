use std::fmt;

/// Broad category of a failure, used to decide how it is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad user input (wrong file type, malformed layout, unusable image).
    Input,
    /// The document could not be decoded or a page could not be rendered.
    Decode,
    /// Upload or metadata callback failed.
    Network,
    /// Everything else: I/O, output assembly, busy guards.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Input => write!(f, "input"),
            ErrorKind::Decode => write!(f, "decode"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("Please upload a PDF file (got {0})")]
    UnsupportedFileType(String),

    #[error("Failed to load layout: {0}")]
    MalformedLayout(#[from] serde_json::Error),

    #[error("Invalid signature image: {0}")]
    InvalidImage(String),

    #[error("Failed to load PDF: {0}")]
    Decode(String),

    #[error("Failed to render page {page}: {reason}")]
    Render { page: usize, reason: String },

    #[error("Page {0} does not exist")]
    PageOutOfRange(usize),

    #[error("No document loaded")]
    NoDocument,

    #[error("Failed to upload signed document: {0}")]
    Upload(String),

    #[error("Metadata callback failed: {0}")]
    Metadata(String),

    #[error("{0} field(s) still need to be filled")]
    Incomplete(usize),

    #[error("Another job is already in progress")]
    Busy,

    #[error("Background job failed: {0}")]
    Worker(String),

    #[error("Failed to assemble output PDF: {0}")]
    Output(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignError::UnsupportedFileType(_)
            | SignError::MalformedLayout(_)
            | SignError::InvalidImage(_)
            | SignError::Incomplete(_) => ErrorKind::Input,
            SignError::Decode(_) | SignError::Render { .. } | SignError::PageOutOfRange(_) => {
                ErrorKind::Decode
            }
            SignError::Upload(_) | SignError::Metadata(_) => ErrorKind::Network,
            SignError::NoDocument
            | SignError::Busy
            | SignError::Worker(_)
            | SignError::Output(_)
            | SignError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<lopdf::Error> for SignError {
    fn from(e: lopdf::Error) -> Self {
        SignError::Output(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignError>;
