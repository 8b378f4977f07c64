//! Resolve extracted item names against the catalog.
//!
//! Lookup order: exact name, then case and whitespace insensitive, then the
//! best Jaro-Winkler score at or above the threshold. Names that resolve to
//! nothing are kept apart in [`OrderMatch::unmatched`].

use serde::Serialize;
use shared::catalog::{CatalogEntry, ParsedOrderItem};
use strsim::jaro_winkler;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    Fuzzy { score: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedItem {
    pub entry: CatalogEntry,
    pub quantity: u32,
    /// Name as the model wrote it
    pub requested_name: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderMatch {
    pub matched: Vec<MatchedItem>,
    pub unmatched: Vec<ParsedOrderItem>,
}

impl OrderMatch {
    /// Sum of price × quantity over the matched lines.
    pub fn total(&self) -> f64 {
        self.matched
            .iter()
            .map(|m| m.entry.price * f64::from(m.quantity))
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Find the catalog entry a single name refers to.
pub fn match_name<'a>(
    name: &str,
    catalog: &'a [CatalogEntry],
    threshold: f64,
) -> Option<(&'a CatalogEntry, MatchKind)> {
    if let Some(entry) = catalog.iter().find(|e| e.name == name) {
        return Some((entry, MatchKind::Exact));
    }

    let wanted = normalize(name);
    if wanted.is_empty() {
        return None;
    }
    if let Some(entry) = catalog.iter().find(|e| normalize(&e.name) == wanted) {
        return Some((entry, MatchKind::CaseInsensitive));
    }

    let mut best: Option<(&CatalogEntry, f64)> = None;
    for entry in catalog {
        let score = jaro_winkler(&wanted, &normalize(&entry.name));
        if score >= threshold && best.map_or(true, |(_, s)| score > s) {
            best = Some((entry, score));
        }
    }
    best.map(|(entry, score)| (entry, MatchKind::Fuzzy { score }))
}

pub fn match_items(
    items: &[ParsedOrderItem],
    catalog: &[CatalogEntry],
    threshold: f64,
) -> OrderMatch {
    let mut result = OrderMatch::default();
    for item in items {
        match match_name(&item.item_name, catalog, threshold) {
            Some((entry, kind)) => result.matched.push(MatchedItem {
                entry: entry.clone(),
                quantity: item.quantity,
                requested_name: item.item_name.clone(),
                kind,
            }),
            None => {
                tracing::debug!(name = %item.item_name, "no catalog entry for ordered item");
                result.unmatched.push(item.clone());
            }
        }
    }
    result
}
