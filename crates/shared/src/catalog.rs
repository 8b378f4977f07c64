//! Catalog and order types exchanged between the caller and the interpreter.

use serde::{Deserialize, Serialize};

/// An orderable item as supplied by the menu subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub price: f64,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
        }
    }
}

/// One line of a structured order recovered from model output.
///
/// `item_name` is whatever the model wrote; it is not guaranteed to match a
/// catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedOrderItem {
    pub item_name: String,
    /// Always at least 1
    pub quantity: u32,
}

impl ParsedOrderItem {
    pub fn new(item_name: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_name: item_name.into(),
            quantity: quantity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_item_serializes_camel_case() {
        let item = ParsedOrderItem::new("Veg Biryani", 2);
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"itemName":"Veg Biryani","quantity":2}"#);
    }

    #[test]
    fn test_quantity_floor_is_one() {
        assert_eq!(ParsedOrderItem::new("Lassi", 0).quantity, 1);
    }

    #[test]
    fn test_catalog_entry_from_json() {
        let entry: CatalogEntry =
            serde_json::from_str(r#"{"id":"m1","name":"Masala Dosa","price":120}"#).unwrap();
        assert_eq!(entry, CatalogEntry::new("m1", "Masala Dosa", 120.0));
    }
}
