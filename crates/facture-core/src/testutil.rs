//! Shared fixtures: synthesized PDFs and scripted collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use crate::error::ServiceError;
use crate::services::memory::{
    MemoryFileStore, MemoryInvoiceSink, MemoryMappingRepository, MemoryTemplateRepository,
};
use crate::services::{
    Collaborators, ExpenseDocument, ExpenseOcr, LanguageModel, ModelPrompt, ModelTier,
    StoredDocument,
};

/// Build a text PDF with one entry per page. Each line of a page's text is
/// written as its own text block so both extraction paths see line breaks.
pub(crate) fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let mut operations = Vec::new();
        for (i, line) in text.lines().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 11.into()]));
            operations.push(Operation::new(
                "Td",
                vec![36.into(), (756 - 14 * i as i64).into()],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut data = Vec::new();
    doc.save_to(&mut data).unwrap();
    data
}

/// Build a PDF of image-only pages, as a scanner would produce.
pub(crate) fn scanned_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    for i in 0..page_count {
        // 8x8 grayscale page scan, shade varies per page
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![40 + 20 * i as u8; 64],
        );
        let image_id = doc.add_object(image);
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        612.into(),
                        0.into(),
                        0.into(),
                        792.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut data = Vec::new();
    doc.save_to(&mut data).unwrap();
    data
}

/// One observed model call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub tier: ModelTier,
    pub image_count: usize,
    pub system: String,
    pub text: String,
}

/// Language model that replays queued replies and records every call.
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Model that always has one reply queued.
    pub fn replying(reply: &str) -> Self {
        Self::new(vec![Ok(reply.to_string())])
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self, tier: ModelTier) -> String {
        match tier {
            ModelTier::Standard => "scripted-standard".to_string(),
            ModelTier::Escalated => "scripted-escalated".to_string(),
        }
    }

    async fn complete(
        &self,
        tier: ModelTier,
        prompt: &ModelPrompt,
    ) -> Result<String, ServiceError> {
        self.calls.lock().unwrap().push(RecordedCall {
            tier,
            image_count: prompt.images.len(),
            system: prompt.system.clone(),
            text: prompt.text.clone(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Transport("no scripted reply left".to_string())))
    }
}

/// Expense OCR that replays queued analyses and records requested keys.
pub(crate) struct ScriptedOcr {
    replies: Mutex<VecDeque<Result<ExpenseDocument, ServiceError>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedOcr {
    pub fn new(replies: Vec<Result<ExpenseDocument, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ExpenseOcr for ScriptedOcr {
    async fn analyze(&self, document: &StoredDocument) -> Result<ExpenseDocument, ServiceError> {
        self.requests.lock().unwrap().push(document.key.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Transport("no scripted analysis left".to_string())))
    }
}

/// In-memory collaborators with typed handles for assertions.
pub(crate) struct TestWorld {
    pub files: Arc<MemoryFileStore>,
    pub templates: Arc<MemoryTemplateRepository>,
    pub mappings: Arc<MemoryMappingRepository>,
    pub sink: Arc<MemoryInvoiceSink>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            files: Arc::new(MemoryFileStore::new()),
            templates: Arc::new(MemoryTemplateRepository::new()),
            mappings: Arc::new(MemoryMappingRepository::new()),
            sink: Arc::new(MemoryInvoiceSink::new()),
        }
    }

    pub fn collaborators(
        &self,
        model: Option<Arc<dyn LanguageModel>>,
        ocr: Option<Arc<dyn ExpenseOcr>>,
    ) -> Collaborators {
        Collaborators {
            model,
            ocr,
            files: self.files.clone(),
            templates: self.templates.clone(),
            mappings: self.mappings.clone(),
            sink: self.sink.clone(),
        }
    }
}
