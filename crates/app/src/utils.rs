use anyhow::{Context, Result};
use providers::StreamError;
use serde::de::DeserializeOwned;
use shared::agent_api::ChatMessage;
use shared::catalog::CatalogEntry;
use std::path::Path;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Catalog file: a JSON array of `{ "id", "name", "price" }`.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    read_json(path)
}

/// History file: a JSON array of `{ "role", "parts": [{ "text" }] }`, oldest first.
pub fn load_history(path: Option<&Path>) -> Result<Vec<ChatMessage>> {
    match path {
        Some(path) => read_json(path),
        None => Ok(Vec::new()),
    }
}

/// Format a session failure with a hint about what to do next
pub fn format_error_message(error: &StreamError) -> String {
    let hint = match error {
        StreamError::Status { status: 401 | 403, .. } => {
            "The ordering service rejected our credentials - check the API key in settings."
        }
        StreamError::Status { status: 429, .. } => {
            "The ordering service is temporarily busy. Please wait a moment and try again."
        }
        StreamError::Status { status, .. } if *status >= 500 => {
            "The ordering service is having trouble right now. Please try again shortly."
        }
        StreamError::Connect(_) | StreamError::Read(_) => {
            "I'm having trouble reaching the ordering service. Please check your network connection."
        }
        StreamError::Frame(_) => {
            "The ordering service sent a reply I couldn't read. Turning off strict frame decoding may help."
        }
        _ => "Sorry, I ran into an issue while taking the order.",
    };
    format!("{}\n\nError: {}", hint, error)
}
