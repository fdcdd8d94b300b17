//! Structured extraction: order lines and registration fields.
//!
//! The engine answers free text that should contain one JSON object. Parsing
//! is tolerant of code fences and surrounding prose, strict about shape.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use pedido_core::{Catalog, ClientDraft, ProductId, TurnFailure};

use crate::llm::{NluEngine, NluError};
use crate::profiles::InstructionProfile;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Engine(#[from] NluError),
    #[error("no answer within {0}ms")]
    Timeout(u128),
    #[error("malformed extraction output: {0}")]
    Malformed(String),
}

impl ExtractionError {
    pub fn into_failure(self, action: &'static str) -> TurnFailure {
        TurnFailure::Extraction { action, detail: self.to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderExtraction {
    /// The message is not an order for catalog products.
    Rejected { message: String },
    /// The engine could not tell what was asked for.
    Ambiguous { message: String },
    Items(Vec<(ProductId, i64)>),
}

pub struct StructuredExtractor {
    nlu: Arc<dyn NluEngine>,
    deadline: Duration,
}

impl StructuredExtractor {
    pub fn new(nlu: Arc<dyn NluEngine>, deadline: Duration) -> Self {
        Self { nlu, deadline }
    }

    pub async fn order_items(
        &self,
        utterance: &str,
        catalog: &Catalog,
    ) -> Result<OrderExtraction, ExtractionError> {
        let input = order_input(utterance, catalog);
        let raw = self.generate(InstructionProfile::OrderItemExtraction, &input).await?;
        parse_order_extraction(&raw)
    }

    pub async fn client_fields(&self, utterance: &str) -> Result<ClientDraft, ExtractionError> {
        let raw = self.generate(InstructionProfile::ClientFieldExtraction, utterance).await?;
        parse_client_fields(&raw)
    }

    async fn generate(
        &self,
        profile: InstructionProfile,
        input: &str,
    ) -> Result<String, ExtractionError> {
        tokio::time::timeout(self.deadline, self.nlu.generate(profile, input))
            .await
            .map_err(|_| ExtractionError::Timeout(self.deadline.as_millis()))?
            .map_err(ExtractionError::from)
    }
}

fn order_input(utterance: &str, catalog: &Catalog) -> String {
    let mut lines = vec!["Catalog:".to_string()];
    lines.extend(
        catalog
            .products()
            .iter()
            .map(|product| format!("{}: {} ({})", product.id, product.name, product.product_type)),
    );
    lines.push(String::new());
    lines.push(format!("Message: {utterance}"));
    lines.join("\n")
}

/// Removes Markdown code fences; falls back to the outermost `{...}` span.
pub fn strip_code_fences(raw: &str) -> &str {
    let stripped = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if stripped.starts_with('{') {
        return stripped;
    }
    match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => stripped,
    }
}

#[derive(Deserialize)]
struct RawOrderExtraction {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    id: Value,
    quantity: Value,
}

pub fn parse_order_extraction(raw: &str) -> Result<OrderExtraction, ExtractionError> {
    let parsed: RawOrderExtraction = serde_json::from_str(strip_code_fences(raw))
        .map_err(|error| ExtractionError::Malformed(error.to_string()))?;
    let message = parsed.message.unwrap_or_default().trim().to_string();

    match parsed.status.trim().to_ascii_lowercase().as_str() {
        "negative" => Ok(OrderExtraction::Rejected { message }),
        "medium" => Ok(OrderExtraction::Ambiguous { message }),
        "positive" => {
            let items = parsed
                .items
                .iter()
                .map(|item| {
                    let id = integer(&item.id, "id")?;
                    let quantity = integer(&item.quantity, "quantity")?;
                    Ok((ProductId(id), quantity))
                })
                .collect::<Result<Vec<_>, ExtractionError>>()?;
            Ok(OrderExtraction::Items(items))
        }
        other => Err(ExtractionError::Malformed(format!("unknown status `{other}`"))),
    }
}

/// Accepts `3`, `3.0` and `"3"`; anything fractional or non-numeric is malformed.
fn integer(value: &Value, field: &str) -> Result<i64, ExtractionError> {
    let parsed = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|float| float.fract() == 0.0).map(|float| float as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExtractionError::Malformed(format!("item {field} `{value}` is not an integer")))
}

#[derive(Deserialize)]
struct RawClientFields {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "localName", alias = "local_name")]
    local_name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

pub fn parse_client_fields(raw: &str) -> Result<ClientDraft, ExtractionError> {
    let parsed: RawClientFields = serde_json::from_str(strip_code_fences(raw))
        .map_err(|error| ExtractionError::Malformed(error.to_string()))?;
    Ok(ClientDraft::new(parsed.name, parsed.local_name, parsed.address))
}
