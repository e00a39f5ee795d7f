//! Error types for the facture-core library.

use thiserror::Error;

/// Main error type for the facture library.
#[derive(Error, Debug)]
pub enum FactureError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// Remote service error (model, OCR, storage, persistence).
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every sub-document of an ingested file failed extraction.
    #[error("no invoices could be extracted from {file}")]
    NoInvoices { file: String },
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// Failed to extract images from PDF.
    #[error("failed to extract images: {0}")]
    ImageExtraction(String),

    /// Failed to split the PDF into page ranges.
    #[error("failed to split PDF: {0}")]
    Split(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),
}

/// Errors raised by the remote collaborators behind the pipeline.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A credential the service needs was not configured.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response arrived but did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Durable storage (file store, repositories, invoice sink) failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Transport(err.to_string())
    }
}

/// Result type for the facture library.
pub type Result<T> = std::result::Result<T, FactureError>;
