//! Message sequences that seed a streaming session.
//!
//! Two call shapes exist: free-form chat, which is just the history plus the
//! new utterance, and order parsing, which is primed with an instruction
//! listing the menu and a fixed acknowledgement from the model.
//!
//! History is taken by reference and copied into a fresh `Vec`; it is never
//! reordered, deduplicated or truncated.

use shared::agent_api::ChatMessage;
use shared::catalog::CatalogEntry;

/// Fixed model turn that follows the order instruction.
pub const ORDER_ACKNOWLEDGEMENT: &str = "Understood! I'll only suggest items from the menu, \
use their exact names, and end every reply with a ```json block listing the items and quantities.";

/// Instruction text for order parsing, with the catalog as `name (price)` lines.
pub fn order_instruction(catalog: &[CatalogEntry]) -> String {
    let menu = if catalog.is_empty() {
        "(the menu is currently empty)".to_string()
    } else {
        catalog
            .iter()
            .map(|entry| format!("{} ({})", entry.name, format_price(entry.price)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are a friendly ordering assistant for a restaurant. Customers describe what they want in their own words and you turn it into an order.

## Menu
{menu}

## Rules
- Only use items from the menu above and copy their names exactly.
- If the customer does not say how many, assume 1.
- If something is not on the menu, say so and suggest the closest item.
- Reply in a short, friendly sentence or two first.

## Response Format
After your reply, add exactly one fenced block like this:

```json
{{"items": [{{"itemName": "<exact menu name>", "quantity": <number>}}]}}
```

Use an empty list when nothing should be ordered."#
    )
}

/// Messages for an order-parsing call: instruction, acknowledgement,
/// history, then the new utterance.
pub fn build_order_context(
    catalog: &[CatalogEntry],
    history: &[ChatMessage],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::user(order_instruction(catalog)));
    messages.push(ChatMessage::model(ORDER_ACKNOWLEDGEMENT));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(user_text));
    messages
}

/// Messages for a chat call: history plus the new utterance.
pub fn build_chat_context(history: &[ChatMessage], user_text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(user_text));
    messages
}

fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{:.0}", price)
    } else {
        format!("{:.2}", price)
    }
}
