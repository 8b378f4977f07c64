//! Recovers the structured order embedded in a finished model response.
//!
//! The model is asked to end its reply with a ```` ```json ```` fence holding
//! `{"items": [{"itemName": .., "quantity": ..}]}`. Nothing guarantees it
//! does, so every failure mode has its own [`ExtractionError`] variant and
//! [`extract_order_or_empty`] folds them into an empty order.

use serde_json::Value;
use shared::catalog::ParsedOrderItem;
use thiserror::Error;

const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("response contains no ```json block")]
    NoStructuredBlock,

    #[error("```json block is never closed")]
    UnterminatedBlock,

    #[error("```json block is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("```json block has no \"items\" list")]
    MissingItems,
}

/// Inner text of the first ```` ```json ```` fence. Later fences are ignored.
pub fn find_structured_block(text: &str) -> Result<&str, ExtractionError> {
    let start = text
        .find(FENCE_OPEN)
        .ok_or(ExtractionError::NoStructuredBlock)?;
    let body = &text[start + FENCE_OPEN.len()..];
    let end = body
        .find(FENCE_CLOSE)
        .ok_or(ExtractionError::UnterminatedBlock)?;
    Ok(body[..end].trim())
}

/// Parse the order out of `text`, keeping the items in block order.
pub fn extract_order(text: &str) -> Result<Vec<ParsedOrderItem>, ExtractionError> {
    let block = find_structured_block(text)?;
    let value: Value = serde_json::from_str(block).map_err(ExtractionError::InvalidJson)?;
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or(ExtractionError::MissingItems)?;

    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| parse_item(index, item))
        .collect())
}

/// Like [`extract_order`], but any failure is logged and becomes an empty
/// order. The prose of the reply stays usable either way.
pub fn extract_order_or_empty(text: &str) -> Vec<ParsedOrderItem> {
    match extract_order(text) {
        Ok(items) => items,
        Err(ExtractionError::NoStructuredBlock) => {
            tracing::debug!("no structured order in response");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not extract order from response");
            Vec::new()
        }
    }
}

fn parse_item(index: usize, item: &Value) -> Option<ParsedOrderItem> {
    let item_name = match item.get("itemName") {
        Some(Value::String(name)) => name.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => {
            tracing::warn!(index, "dropping order line without an itemName");
            return None;
        }
    };

    Some(ParsedOrderItem {
        item_name,
        quantity: coerce_quantity(item.get("quantity")),
    })
}

// Numbers and numeric strings count; fractions are truncated. Anything
// else, and anything below 1, means 1.
fn coerce_quantity(value: Option<&Value>) -> u32 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && n >= 1.0 => n.trunc().min(u32::MAX as f64) as u32,
        _ => 1,
    }
}
