//! Invoice boundary detection for multi-invoice PDFs.
//!
//! A model proposes page ranges; everything here is best-effort. When the
//! model is unavailable or its reply does not validate, the whole document
//! is treated as a single invoice.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::extract::clip_chars;
use crate::models::config::BoundaryConfig;
use crate::pdf::PdfDocument;
use crate::services::llm::clean_json_reply;
use crate::services::{LanguageModel, ModelPrompt, ModelTier, PageImage};

const BOUNDARY_SYSTEM_PROMPT: &str = r#"You segment multi-page documents into separate invoices.
Pages are numbered from 0. Reply with JSON only, no markdown fences:
{"ranges": [{"start": 0, "end": 1, "is_invoice": true, "label": "short description or null"}]}

Rules:
- Ranges are inclusive, must not overlap, and should cover every page.
- Mark cover letters, statements, terms pages and other non-invoice
  material with "is_invoice": false.
- A new invoice usually starts where an invoice number, vendor header
  or "Page 1 of N" marker restarts."#;

/// Most page thumbnails attached to one segmentation request.
const MAX_BOUNDARY_PAGES: u32 = 16;

/// An inclusive page range, zero-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryRange {
    pub start: u32,
    pub end: u32,
    pub is_invoice: bool,
    #[serde(default)]
    pub label: Option<String>,
}

impl BoundaryRange {
    pub fn invoice(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            is_invoice: true,
            label: None,
        }
    }

    pub fn page_count(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }
}

#[derive(Debug, Deserialize)]
struct BoundaryReply {
    ranges: Vec<BoundaryRange>,
}

/// Segment a document into invoice ranges.
///
/// Single-page documents are one invoice by definition and never reach
/// the model.
pub async fn detect(
    document: &PdfDocument,
    model: Option<&Arc<dyn LanguageModel>>,
    config: &BoundaryConfig,
) -> Vec<BoundaryRange> {
    let page_count = document.page_count();
    if page_count <= 1 {
        return full_document(page_count);
    }

    let Some(model) = model else {
        debug!("no model configured, treating document as one invoice");
        return full_document(page_count);
    };

    let Some(prompt) = build_prompt(document, config) else {
        warn!("document has no usable text or images for segmentation");
        return full_document(page_count);
    };

    match model.complete(ModelTier::Standard, &prompt).await {
        Ok(raw) => match parse_reply(&raw) {
            Some(ranges) => {
                let ranges = normalize(ranges, page_count);
                debug!(ranges = ranges.len(), "segmented document");
                ranges
            }
            None => {
                warn!("boundary reply unusable, treating document as one invoice");
                full_document(page_count)
            }
        },
        Err(e) => {
            warn!("boundary detection failed: {e}");
            full_document(page_count)
        }
    }
}

fn full_document(page_count: u32) -> Vec<BoundaryRange> {
    vec![BoundaryRange::invoice(0, page_count.saturating_sub(1))]
}

fn build_prompt(document: &PdfDocument, config: &BoundaryConfig) -> Option<ModelPrompt> {
    let texts = document.page_texts();
    let total: usize = texts.iter().map(|t| t.chars().count()).sum();
    let mean = total / texts.len().max(1);

    if mean < config.min_chars_per_page {
        let images = thumbnails(document, config);
        if !images.is_empty() {
            return Some(ModelPrompt::with_images(
                BOUNDARY_SYSTEM_PROMPT,
                format!(
                    "Segment this {}-page document into invoices using the attached page images.",
                    document.page_count()
                ),
                images,
            ));
        }
    }
    if total == 0 {
        return None;
    }

    let mut previews = String::new();
    for (index, text) in texts.iter().enumerate() {
        previews.push_str(&format!(
            "--- page {index} ---\n{}\n\n",
            clip_chars(text, config.page_preview_chars)
        ));
    }
    Some(ModelPrompt::text_only(
        BOUNDARY_SYSTEM_PROMPT,
        format!(
            "Segment this {}-page document into invoices.\n\n{previews}",
            document.page_count()
        ),
    ))
}

fn thumbnails(document: &PdfDocument, config: &BoundaryConfig) -> Vec<PageImage> {
    let pages = document.page_count().min(MAX_BOUNDARY_PAGES);
    (1..=pages)
        .filter_map(|page| match document.page_png(page, config.image_max_edge) {
            Ok(png) => Some(PageImage { page, png }),
            Err(e) => {
                debug!(page, "no thumbnail: {e}");
                None
            }
        })
        .collect()
}

fn parse_reply(raw: &str) -> Option<Vec<BoundaryRange>> {
    let reply: BoundaryReply = serde_json::from_str(clean_json_reply(raw))
        .map_err(|e| warn!("boundary reply failed validation: {e}"))
        .ok()?;
    Some(reply.ranges)
}

/// Turn a model's proposal into a clean partition of the document:
/// sorted, clamped, overlap-free, with uncovered pages filled in as
/// non-invoice ranges. A proposal with no invoice range at all degrades
/// to one whole-document invoice.
fn normalize(mut ranges: Vec<BoundaryRange>, page_count: u32) -> Vec<BoundaryRange> {
    let last = page_count.saturating_sub(1);
    ranges.retain(|r| r.start <= r.end && r.start <= last);
    for range in &mut ranges {
        if range.end > last {
            range.end = last;
        }
    }
    ranges.sort_by_key(|r| (r.start, r.end));

    let mut out: Vec<BoundaryRange> = Vec::new();
    let mut next_page = 0u32;
    for mut range in ranges {
        if range.end < next_page {
            continue;
        }
        if range.start < next_page {
            range.start = next_page;
        }
        if range.start > next_page {
            out.push(BoundaryRange {
                start: next_page,
                end: range.start - 1,
                is_invoice: false,
                label: None,
            });
        }
        next_page = range.end + 1;
        out.push(range);
    }
    if next_page <= last {
        out.push(BoundaryRange {
            start: next_page,
            end: last,
            is_invoice: false,
            label: None,
        });
    }

    if !out.iter().any(|r| r.is_invoice) {
        return vec![BoundaryRange::invoice(0, last)];
    }
    out
}
