//! PDF processing module.

mod document;
mod splitter;

pub use document::PdfDocument;
pub use splitter::{SubDocument, split};

use crate::error::PdfError;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;
