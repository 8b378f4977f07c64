//! Natural-language order interpreter
//!
//! Builds the conversation for a call, streams the model's reply through
//! [`providers`], and turns the finished reply into a structured order:
//! - [`prompts`]: chat and order-parsing message sequences
//! - [`extraction`]: the ```` ```json ```` order block → [`ParsedOrderItem`]s
//! - [`catalog_match`]: optional resolution of item names against the menu
//! - [`order_session`]: the call façade tying it all together

pub mod catalog_match;
pub mod extraction;
pub mod order_session;
pub mod prompts;

pub use catalog_match::{match_items, MatchKind, MatchedItem, OrderMatch};
pub use extraction::{extract_order, extract_order_or_empty, ExtractionError};
pub use order_session::{OrderInterpreter, OrderObserver, OrderReply};
pub use prompts::{build_chat_context, build_order_context};
pub use shared::catalog::{CatalogEntry, ParsedOrderItem};
