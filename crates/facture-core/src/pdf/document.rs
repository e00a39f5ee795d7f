//! PDF text and image access using lopdf and pdf-extract.

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, Rgba, imageops::FilterType};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::Result;
use crate::error::PdfError;

/// A loaded PDF with text and image access.
///
/// Pages are 1-indexed throughout, matching lopdf.
pub struct PdfDocument {
    document: Document,
    raw_data: Vec<u8>,
}

impl PdfDocument {
    /// Load a PDF from bytes.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut document = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        // Handle PDFs with empty password encryption
        let raw_data = if document.is_encrypted() {
            if document.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("decrypted PDF with empty password");
            let mut decrypted = Vec::new();
            document
                .save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {e}")))?;
            decrypted
        } else {
            data.to_vec()
        };

        if document.get_pages().is_empty() {
            return Err(PdfError::NoPages);
        }
        debug!("loaded PDF with {} pages", document.get_pages().len());

        Ok(Self { document, raw_data })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    /// The (decrypted) bytes the document was loaded from.
    pub fn raw_data(&self) -> &[u8] {
        &self.raw_data
    }

    /// Extract the full text layer of the document.
    pub fn text(&self) -> Result<String> {
        match pdf_extract::extract_text_from_mem(&self.raw_data) {
            Ok(text) => Ok(text),
            Err(e) => {
                // Some files trip pdf-extract but still carry text lopdf can
                // read page by page.
                warn!("pdf-extract failed, falling back to per-page text: {e}");
                let pages: Vec<u32> = (1..=self.page_count()).collect();
                self.document
                    .extract_text(&pages)
                    .map_err(|e| PdfError::TextExtraction(e.to_string()))
            }
        }
    }

    /// Extract text for one page (1-indexed).
    pub fn page_text(&self, page: u32) -> Result<String> {
        if page == 0 || page > self.page_count() {
            return Err(PdfError::InvalidPage(page));
        }
        self.document
            .extract_text(&[page])
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    /// Text of every page in order. Pages whose extraction fails come back
    /// empty rather than failing the whole document.
    pub fn page_texts(&self) -> Vec<String> {
        (1..=self.page_count())
            .map(|page| self.page_text(page).unwrap_or_default())
            .collect()
    }

    /// The dominant embedded image of a page (1-indexed). Scanned documents
    /// typically carry one full-page image per page.
    pub fn page_image(&self, page: u32) -> Result<DynamicImage> {
        let pages = self.document.get_pages();
        let page_id = *pages.get(&page).ok_or(PdfError::InvalidPage(page))?;

        let mut images = self.page_images(page_id);
        if images.is_empty() {
            // Some producers attach images outside page resources.
            debug!("no XObject images on page {page}, scanning all objects");
            images = self.all_images();
            let idx = (page - 1) as usize;
            if idx < images.len() {
                return Ok(images.swap_remove(idx));
            }
        }

        images
            .into_iter()
            .max_by_key(|img| u64::from(img.width()) * u64::from(img.height()))
            .ok_or_else(|| PdfError::ImageExtraction(format!("no image found on page {page}")))
    }

    /// PNG-encode the image of a page, downscaled so the longer edge does
    /// not exceed `max_edge`.
    pub fn page_png(&self, page: u32, max_edge: u32) -> Result<Vec<u8>> {
        let mut img = self.page_image(page)?;
        if img.width().max(img.height()) > max_edge {
            img = img.resize(max_edge, max_edge, FilterType::Triangle);
        }
        let mut data = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), image::ImageFormat::Png)
            .map_err(|e| PdfError::ImageExtraction(e.to_string()))?;
        Ok(data)
    }

    /// Images referenced by one page's resources.
    fn page_images(&self, page_id: ObjectId) -> Vec<DynamicImage> {
        let doc = &self.document;
        let mut images = Vec::new();

        if let Some(resources) = self.page_resources(page_id) {
            if let Ok(xobjects) = resources.get(b"XObject") {
                if let Ok((_, Object::Dictionary(xobj_dict))) = doc.dereference(xobjects) {
                    for (_name, obj_ref) in xobj_dict.iter() {
                        if let Ok((_, obj)) = doc.dereference(obj_ref) {
                            if let Some(img) = image_from_object(doc, obj) {
                                images.push(img);
                            }
                        }
                    }
                }
            }
        }
        images
    }

    /// Every decodable image in the document, in object order.
    fn all_images(&self) -> Vec<DynamicImage> {
        let images: Vec<DynamicImage> = self
            .document
            .objects
            .iter()
            .filter_map(|(_, object)| image_from_object(&self.document, object))
            .collect();
        debug!("found {} images in document", images.len());
        images
    }

    /// Resources dictionary for a page, walking up the page tree for
    /// inherited entries.
    fn page_resources(&self, page_id: ObjectId) -> Option<Dictionary> {
        let doc = &self.document;
        let mut node_id = page_id;

        loop {
            let Ok(Object::Dictionary(dict)) = doc.get_object(node_id) else {
                return None;
            };
            if let Ok(resources) = dict.get(b"Resources") {
                if let Ok((_, Object::Dictionary(res_dict))) = doc.dereference(resources) {
                    return Some(res_dict.clone());
                }
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent_id)) => node_id = *parent_id,
                _ => return None,
            }
        }
    }
}

/// Try to decode an image XObject stream.
fn image_from_object(doc: &Document, obj: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;

    let subtype = dict.get(b"Subtype").ok()?;
    if subtype.as_name().ok()? != b"Image" {
        return None;
    }

    let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
    let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;
    trace!("found image object: {width}x{height}");

    let data = match stream.decompressed_content() {
        Ok(d) => d,
        Err(_) => stream.content.clone(),
    };

    if let Ok(filter) = dict.get(b"Filter") {
        let filter_name = match filter {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) if !arr.is_empty() => arr.first().and_then(|o| o.as_name().ok()),
            _ => None,
        };

        match filter_name {
            Some(b"DCTDecode") => {
                // JPEG data, raw stream content is the compressed image
                return image::load_from_memory_with_format(
                    &stream.content,
                    image::ImageFormat::Jpeg,
                )
                .ok();
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                trace!("unsupported image filter");
                return None;
            }
            _ => {}
        }
    }

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
            Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
            _ => None,
        })
        .unwrap_or(b"DeviceRGB");

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8) as u8;

    image_from_raw(&data, width, height, color_space, bits)
}

/// Decode raw (unfiltered) image samples into an RGBA image.
fn image_from_raw(
    data: &[u8],
    width: u32,
    height: u32,
    color_space: &[u8],
    bits_per_component: u8,
) -> Option<DynamicImage> {
    if bits_per_component != 8 {
        trace!("unsupported bits per component: {bits_per_component}");
        return None;
    }

    let expected_rgb = (width * height * 3) as usize;
    let expected_gray = (width * height) as usize;

    if (color_space == b"DeviceRGB" || color_space == b"RGB") && data.len() >= expected_rgb {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for chunk in data[..expected_rgb].chunks(3) {
            rgba.extend_from_slice(chunk);
            rgba.push(255);
        }
        return ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba)
            .map(DynamicImage::ImageRgba8);
    }

    if (color_space == b"DeviceGray" || color_space == b"G") && data.len() >= expected_gray {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for &gray in &data[..expected_gray] {
            rgba.extend_from_slice(&[gray, gray, gray, 255]);
        }
        return ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba)
            .map(DynamicImage::ImageRgba8);
    }

    trace!(
        "could not decode image: data_len={}, expected_rgb={expected_rgb}, expected_gray={expected_gray}",
        data.len()
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pdf_with_pages;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_rejects_garbage() {
        assert!(matches!(
            PdfDocument::load(b"not a pdf"),
            Err(PdfError::Parse(_))
        ));
    }

    #[test]
    fn test_page_count_and_text() {
        let data = pdf_with_pages(&["INVOICE #100\nAcme Foods", "Page two text"]);
        let doc = PdfDocument::load(&data).unwrap();

        assert_eq!(doc.page_count(), 2);

        let first = doc.page_text(1).unwrap();
        assert!(first.contains("INVOICE #100"));
        assert!(first.contains("Acme Foods"));

        let second = doc.page_text(2).unwrap();
        assert!(second.contains("Page two"));
        assert!(!second.contains("Acme"));
    }

    #[test]
    fn test_page_text_rejects_out_of_range() {
        let data = pdf_with_pages(&["only page"]);
        let doc = PdfDocument::load(&data).unwrap();
        assert!(matches!(doc.page_text(0), Err(PdfError::InvalidPage(0))));
        assert!(matches!(doc.page_text(9), Err(PdfError::InvalidPage(9))));
    }

    #[test]
    fn test_full_text_spans_pages() {
        let data = pdf_with_pages(&["alpha", "bravo", "charlie"]);
        let doc = PdfDocument::load(&data).unwrap();
        let text = doc.text().unwrap();
        assert!(text.contains("alpha"));
        assert!(text.contains("bravo"));
        assert!(text.contains("charlie"));
    }

    #[test]
    fn test_page_image_missing() {
        let data = pdf_with_pages(&["text only"]);
        let doc = PdfDocument::load(&data).unwrap();
        assert!(doc.page_image(1).is_err());
    }
}
