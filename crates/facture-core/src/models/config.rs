//! Configuration structures for the ingestion pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main configuration for the facture pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Boundary detection configuration.
    pub boundary: BoundaryConfig,

    /// Extraction cascade configuration.
    pub extraction: ExtractionConfig,

    /// Language model service configuration.
    pub model: ModelConfig,

    /// Structured OCR service configuration.
    pub ocr: OcrServiceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            boundary: BoundaryConfig::default(),
            extraction: ExtractionConfig::default(),
            model: ModelConfig::default(),
            ocr: OcrServiceConfig::default(),
        }
    }
}

/// Boundary detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Pages averaging fewer extractable characters than this are treated
    /// as scanned, switching boundary detection to page thumbnails.
    pub min_chars_per_page: usize,

    /// Characters of per-page text included in the boundary prompt.
    pub page_preview_chars: usize,

    /// Maximum edge length of page thumbnails sent for boundary detection.
    pub image_max_edge: u32,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            min_chars_per_page: 50,
            page_preview_chars: 600,
            image_max_edge: 768,
        }
    }
}

/// Extraction cascade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Sub-documents with fewer extractable characters than this are
    /// treated as scanned and extracted from page images.
    pub min_text_chars: usize,

    /// Character budget for document text embedded in model prompts.
    pub prompt_char_budget: usize,

    /// Minimum mean line confidence for a model extraction to pass the
    /// quality gate without escalation.
    pub min_mean_confidence: f32,

    /// Tolerance when checking quantity x unit cost against line amounts.
    pub amount_tolerance: Decimal,

    /// Maximum edge length of page images sent for vision extraction.
    pub image_max_edge: u32,

    /// Default currency if not detected.
    pub default_currency: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 150,
            prompt_char_budget: 12_000,
            min_mean_confidence: 0.7,
            amount_tolerance: Decimal::new(2, 2),
            image_max_edge: 1024,
            default_currency: "USD".to_string(),
        }
    }
}

/// Language model service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Chat completions endpoint base URL.
    pub base_url: String,

    /// Model used for the standard tier.
    pub model: String,

    /// Model used when a low-quality extraction escalates.
    pub escalation_model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Sampling temperature.
    pub temperature: f64,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            escalation_model: "gpt-4o".to_string(),
            api_key_env: "FACTURE_MODEL_API_KEY".to_string(),
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

/// Structured OCR service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrServiceConfig {
    /// Expense analysis endpoint. Empty disables the OCR tier.
    pub endpoint: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OcrServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key_env: "FACTURE_OCR_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}
