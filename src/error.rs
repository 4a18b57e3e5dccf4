//! Error types for the PDF form labeler

use thiserror::Error;

/// Result type alias for the PDF form labeler
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the PDF form labeler
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed bounding box or matcher configuration
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// PDF file not found on disk
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Page out of bounds
    #[error("Page {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: u32, total: u32 },

    /// Uploaded file unknown or expired
    #[error("File not found or expired: {file_id}")]
    FileNotFound { file_id: String },

    /// Filled output requested before fill_form ran
    #[error("No filled output for file: {file_id}")]
    OutputNotReady { file_id: String },

    /// Upload rejected because it is not a PDF
    #[error("Unsupported upload: {name}")]
    UnsupportedUpload { name: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// Image rendering or encoding error
    #[error("Image error: {reason}")]
    Image { reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::InvalidArgument { reason } => format!("Invalid argument: {}", reason),
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of bounds (1-{})", page, total)
            }
            Error::FileNotFound { .. } => "File not found or expired".to_string(),
            Error::OutputNotReady { .. } => {
                "File not found or not filled yet".to_string()
            }
            Error::UnsupportedUpload { .. } => "Only PDF files are supported".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdfium { .. } => "PDF processing error".to_string(),
            Error::Image { .. } => "Image processing error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
        }
    }
}
