//! Error types for the PDF toolkit

use thiserror::Error;

/// Result type alias for the PDF toolkit
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification used to pick the response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller sent an incomplete or malformed request
    Validation,
    /// Job or staged file does not exist
    NotFound,
    /// Wrong password, or a password-related misuse
    Encryption,
    /// Anything that went wrong on our side
    Processing,
}

/// Error types for the PDF toolkit
#[derive(Error, Debug)]
pub enum Error {
    /// Required request field was absent or empty
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// Multipart body could not be read
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    /// Request body was not a multipart form
    #[error("Rejected multipart request: {0}")]
    MultipartRejection(#[from] axum::extract::multipart::MultipartRejection),

    /// Query string did not match the expected parameters
    #[error("Rejected query string: {0}")]
    QueryRejection(#[from] axum::extract::rejection::QueryRejection),

    /// Merge job does not exist (never created, or already consumed)
    #[error("Merge job not found: {id}")]
    JobNotFound { id: String },

    /// Staged PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is password protected and no usable password was given
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Incorrect password provided
    #[error("Incorrect password")]
    IncorrectPassword,

    /// Password removal requested for a document that has none
    #[error("PDF is not password protected")]
    NotProtected,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// lopdf error
    #[error("lopdf error: {reason}")]
    Lopdf { reason: String },

    /// Every grayscale strategy failed
    #[error("Grayscale conversion failed: {reason}")]
    Conversion { reason: String },

    /// Blocking task panicked or was cancelled
    #[error("Task join error: {reason}")]
    Task { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Error::Lopdf {
            reason: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task {
            reason: e.to_string(),
        }
    }
}

impl Error {
    /// Classify the error for status mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingField { .. }
            | Error::Multipart(_)
            | Error::MultipartRejection(_)
            | Error::QueryRejection(_) => ErrorKind::Validation,
            Error::JobNotFound { .. } | Error::PdfNotFound { .. } => ErrorKind::NotFound,
            Error::PasswordRequired | Error::IncorrectPassword | Error::NotProtected => {
                ErrorKind::Encryption
            }
            Error::InvalidPdf { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::QpdfError { .. }
            | Error::Lopdf { .. }
            | Error::Conversion { .. }
            | Error::Task { .. }
            | Error::Config { .. } => ErrorKind::Processing,
        }
    }

    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::MissingField { field } => match *field {
                "file" => "No file provided".to_string(),
                "files" => "No files provided".to_string(),
                "id" => "Missing merge ID".to_string(),
                "password" => "Password is required".to_string(),
                other => format!("Missing required field: {}", other),
            },
            Error::Multipart(e) => format!("Malformed multipart body: {}", e.body_text()),
            Error::MultipartRejection(e) => format!("Expected a multipart form: {}", e.body_text()),
            Error::QueryRejection(e) => format!("Invalid query string: {}", e.body_text()),
            Error::JobNotFound { .. } => "Invalid merge ID".to_string(),
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::IncorrectPassword => "Incorrect password for this PDF".to_string(),
            Error::NotProtected => "This PDF is not password protected".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::QpdfError { .. } | Error::Lopdf { .. } => "PDF processing error".to_string(),
            Error::Conversion { .. } => "Failed to convert PDF to grayscale".to_string(),
            Error::Task { .. } => "Internal error".to_string(),
            Error::Config { .. } => "Server misconfigured".to_string(),
        }
    }
}
