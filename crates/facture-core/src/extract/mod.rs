//! The extraction cascade: template match, structured OCR, model tiers.

pub mod model_extractor;
pub mod ocr_adapter;
pub mod validate;

pub use model_extractor::{ModelExtraction, ModelExtractor};

use crate::error::ServiceError;
use crate::models::InvoiceRecord;

/// Result of one extraction attempt.
///
/// Callers must branch on the variant: a failed path is ordinary control
/// flow (the cascade moves on), not an error.
#[derive(Debug)]
pub enum Outcome {
    /// A record that passed the path's quality gate.
    Extracted(Box<InvoiceRecord>),

    /// The path does not apply to this document.
    NoMatch,

    /// A record came back but failed the quality gate.
    LowQuality(Box<InvoiceRecord>),

    /// The path's backing service failed.
    ServiceFailure(ServiceError),
}

impl Outcome {
    /// Whether this outcome carries a gate-passing record.
    pub fn is_extracted(&self) -> bool {
        matches!(self, Outcome::Extracted(_))
    }

    /// The record carried by this outcome, if any.
    pub fn into_record(self) -> Option<InvoiceRecord> {
        match self {
            Outcome::Extracted(record) | Outcome::LowQuality(record) => Some(*record),
            _ => None,
        }
    }
}

/// Clip a string to a character budget without splitting a character.
pub(crate) fn clip_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
