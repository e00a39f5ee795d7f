//! Carves a multi-invoice PDF into one file per invoice range.

use std::path::Path;

use lopdf::Document;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::Result;
use crate::boundary::BoundaryRange;
use crate::error::PdfError;

/// One invoice carved out of a source PDF.
///
/// The backing file is a temp file and is removed when the value drops,
/// so callers read or upload it before letting go.
#[derive(Debug)]
pub struct SubDocument {
    file: NamedTempFile,
    pub range: BoundaryRange,
    /// True when the part is a plain copy of the source document.
    pub whole_document: bool,
}

impl SubDocument {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.file.path())
    }
}

/// Write one PDF per invoice range. Non-invoice ranges produce nothing.
///
/// A range that cannot be carved cleanly falls back to a copy of the
/// whole source document rather than losing the invoice.
pub fn split(data: &[u8], ranges: &[BoundaryRange]) -> Result<Vec<SubDocument>> {
    let invoice_ranges: Vec<&BoundaryRange> = ranges.iter().filter(|r| r.is_invoice).collect();
    if invoice_ranges.is_empty() {
        return Ok(Vec::new());
    }

    let base = Document::load_mem(data).ok();
    let page_count = base
        .as_ref()
        .map(|d| d.get_pages().len() as u32)
        .unwrap_or(0);

    let mut parts = Vec::with_capacity(invoice_ranges.len());
    for range in invoice_ranges {
        let part = match &base {
            Some(document) if !covers_all(range, page_count) => {
                match carve(document, range) {
                    Ok(part) => part,
                    Err(e) => {
                        warn!(
                            start = range.start,
                            end = range.end,
                            "carve failed, keeping whole document: {e}"
                        );
                        write_raw(data, range)?
                    }
                }
            }
            _ => write_raw(data, range)?,
        };
        debug!(
            start = part.range.start,
            end = part.range.end,
            path = %part.path().display(),
            "wrote invoice part"
        );
        parts.push(part);
    }

    Ok(parts)
}

fn covers_all(range: &BoundaryRange, page_count: u32) -> bool {
    page_count == 0 || (range.start == 0 && range.end + 1 >= page_count)
}

fn carve(document: &Document, range: &BoundaryRange) -> Result<SubDocument> {
    let mut doc = document.clone();
    let total = doc.get_pages().len() as u32;

    let delete: Vec<u32> = (1..=total)
        .filter(|page| *page < range.start + 1 || *page > range.end + 1)
        .collect();
    if !delete.is_empty() {
        doc.delete_pages(&delete);
    }
    if doc.get_pages().is_empty() {
        return Err(PdfError::Split("no pages left after carving".to_string()));
    }
    doc.prune_objects();

    let file = part_file()?;
    let mut target = file.as_file();
    doc.save_to(&mut target)
        .map_err(|e| PdfError::Split(e.to_string()))?;

    Ok(SubDocument {
        file,
        range: range.clone(),
        whole_document: false,
    })
}

fn write_raw(data: &[u8], range: &BoundaryRange) -> Result<SubDocument> {
    let file = part_file()?;
    std::fs::write(file.path(), data).map_err(|e| PdfError::Split(e.to_string()))?;
    Ok(SubDocument {
        file,
        range: range.clone(),
        whole_document: true,
    })
}

fn part_file() -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix("facture-split-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| PdfError::Split(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::PdfDocument;
    use crate::testutil::pdf_with_pages;
    use pretty_assertions::assert_eq;

    fn three_pages() -> Vec<u8> {
        pdf_with_pages(&["cover letter", "invoice alpha", "invoice beta"])
    }

    #[test]
    fn test_middle_range_becomes_single_page_file() {
        let ranges = vec![BoundaryRange::invoice(1, 1)];
        let parts = split(&three_pages(), &ranges).unwrap();

        assert_eq!(parts.len(), 1);
        assert!(!parts[0].whole_document);

        let doc = PdfDocument::load(&parts[0].bytes().unwrap()).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert!(doc.text().unwrap().contains("invoice alpha"));
    }

    #[test]
    fn test_full_range_copies_source() {
        let data = three_pages();
        let ranges = vec![BoundaryRange::invoice(0, 2)];
        let parts = split(&data, &ranges).unwrap();

        assert_eq!(parts.len(), 1);
        assert!(parts[0].whole_document);
        assert_eq!(parts[0].bytes().unwrap(), data);
    }

    #[test]
    fn test_non_invoice_ranges_produce_nothing() {
        let mut cover = BoundaryRange::invoice(0, 0);
        cover.is_invoice = false;
        cover.label = Some("cover letter".to_string());
        let ranges = vec![cover, BoundaryRange::invoice(1, 2)];

        let parts = split(&three_pages(), &ranges).unwrap();
        assert_eq!(parts.len(), 1);

        let doc = PdfDocument::load(&parts[0].bytes().unwrap()).unwrap();
        assert_eq!(doc.page_count(), 2);
        let text = doc.text().unwrap();
        assert!(text.contains("invoice alpha"));
        assert!(!text.contains("cover letter"));
    }

    #[test]
    fn test_two_invoices_become_two_files() {
        let ranges = vec![BoundaryRange::invoice(0, 0), BoundaryRange::invoice(1, 2)];
        let parts = split(&three_pages(), &ranges).unwrap();

        assert_eq!(parts.len(), 2);
        let first = PdfDocument::load(&parts[0].bytes().unwrap()).unwrap();
        let second = PdfDocument::load(&parts[1].bytes().unwrap()).unwrap();
        assert_eq!(first.page_count(), 1);
        assert_eq!(second.page_count(), 2);
        assert!(first.text().unwrap().contains("cover letter"));
        assert!(second.text().unwrap().contains("invoice beta"));
    }

    #[test]
    fn test_parts_are_removed_on_drop() {
        let parts = split(&three_pages(), &[BoundaryRange::invoice(1, 1)]).unwrap();
        let path = parts[0].path().to_path_buf();
        assert!(path.exists());

        drop(parts);
        assert!(!path.exists());
    }

    #[test]
    fn test_no_ranges_no_parts() {
        let parts = split(&three_pages(), &[]).unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_unparseable_source_falls_back_to_copy() {
        let data = b"%PDF-1.4 garbage".to_vec();
        let parts = split(&data, &[BoundaryRange::invoice(0, 0)]).unwrap();

        assert_eq!(parts.len(), 1);
        assert!(parts[0].whole_document);
        assert_eq!(parts[0].bytes().unwrap(), data);
    }
}
