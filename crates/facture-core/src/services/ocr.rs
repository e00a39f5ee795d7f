//! HTTP client for a structured expense-OCR service.
//!
//! The service analyzes a stored document by reference and returns typed
//! summary fields plus line item groups, each value carrying its own
//! confidence.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ExpenseOcr, Result, StoredDocument};
use crate::error::ServiceError;
use crate::models::config::OcrServiceConfig;

/// Analysis of one expense document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpenseDocument {
    /// Document-level fields (vendor, totals, dates).
    #[serde(default)]
    pub summary_fields: Vec<ExpenseField>,

    /// One entry per detected line item.
    #[serde(default)]
    pub line_items: Vec<ExpenseLineItem>,
}

/// One typed field with its recognized value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseField {
    /// Field type from the service vocabulary (VENDOR_NAME, TOTAL, ...).
    pub field_type: String,

    /// Recognized text value.
    #[serde(default)]
    pub value: String,

    /// Recognition confidence (0.0 - 1.0).
    #[serde(default)]
    pub confidence: f32,
}

impl ExpenseField {
    /// Convenience constructor, mostly for fixtures.
    pub fn new(field_type: &str, value: &str, confidence: f32) -> Self {
        Self {
            field_type: field_type.to_string(),
            value: value.to_string(),
            confidence,
        }
    }
}

/// Fields recognized for one line item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpenseLineItem {
    /// Typed fields of this line (ITEM, QUANTITY, PRICE, ...).
    #[serde(default)]
    pub fields: Vec<ExpenseField>,
}

impl ExpenseLineItem {
    /// Value of the first field with the given type, if present.
    pub fn field(&self, field_type: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.field_type == field_type)
            .map(|f| f.value.as_str())
    }

    /// Confidence of the first field with the given type.
    pub fn field_confidence(&self, field_type: &str) -> Option<f32> {
        self.fields
            .iter()
            .find(|f| f.field_type == field_type)
            .map(|f| f.confidence)
    }
}

/// HTTP-backed expense OCR client.
pub struct HttpExpenseOcr {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpExpenseOcr {
    /// Build a client from configuration. Fails when no endpoint is
    /// configured.
    pub fn from_config(config: &OcrServiceConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(ServiceError::MissingCredentials(
                "expense OCR endpoint not configured".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    document: DocumentRef<'a>,
}

#[derive(Debug, Serialize)]
struct DocumentRef<'a> {
    key: &'a str,
    url: &'a str,
}

#[async_trait::async_trait]
impl ExpenseOcr for HttpExpenseOcr {
    async fn analyze(&self, document: &StoredDocument) -> Result<ExpenseDocument> {
        debug!(key = %document.key, "requesting expense analysis");

        let request = AnalyzeRequest {
            document: DocumentRef {
                key: &document.key,
                url: &document.url,
            },
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }
}
