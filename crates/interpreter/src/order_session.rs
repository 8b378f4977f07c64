use anyhow::Result;
use providers::{Callbacks, GeminiStreamClient, StreamError, StreamObserver, StreamSession};
use serde::Serialize;
use shared::agent_api::ChatMessage;
use shared::catalog::{CatalogEntry, ParsedOrderItem};
use shared::settings::InterpreterSettings;
use tokio_util::sync::CancellationToken;

use crate::catalog_match::{match_items, OrderMatch};
use crate::extraction::extract_order_or_empty;
use crate::prompts::{build_chat_context, build_order_context};

/// Callbacks for an order-parsing session.
///
/// `on_items` follows `on_complete` and always fires on success, with an
/// empty slice when the reply carried no usable order.
pub trait OrderObserver: Send {
    fn on_chunk(&mut self, delta: &str);
    fn on_complete(&mut self, full_text: &str);
    fn on_items(&mut self, items: &[ParsedOrderItem]);
    fn on_error(&mut self, error: &StreamError);
}

struct OrderStream<O> {
    inner: O,
}

impl<O: OrderObserver> StreamObserver for OrderStream<O> {
    fn on_chunk(&mut self, delta: &str) {
        self.inner.on_chunk(delta);
    }

    fn on_complete(&mut self, full_text: &str) {
        self.inner.on_complete(full_text);
        let items = extract_order_or_empty(full_text);
        self.inner.on_items(&items);
    }

    fn on_error(&mut self, error: &StreamError) {
        self.inner.on_error(error);
    }
}

/// Everything an order-parsing call produced.
#[derive(Debug, Clone, Serialize)]
pub struct OrderReply {
    pub text: String,
    pub items: Vec<ParsedOrderItem>,
    pub matched: OrderMatch,
}

/// Entry point for chat and order-parsing calls.
#[derive(Clone)]
pub struct OrderInterpreter {
    client: GeminiStreamClient,
    settings: InterpreterSettings,
}

impl OrderInterpreter {
    pub fn new(client: GeminiStreamClient, settings: InterpreterSettings) -> Self {
        Self { client, settings }
    }

    pub fn from_settings(settings: InterpreterSettings) -> Result<Self> {
        let client = GeminiStreamClient::new(settings.stream.clone())?;
        Ok(Self::new(client, settings))
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// Free-form chat: stream a reply to `user_text` given `history`.
    pub fn chat<O>(&self, history: &[ChatMessage], user_text: &str, observer: O) -> StreamSession
    where
        O: StreamObserver + 'static,
    {
        let messages = build_chat_context(history, user_text);
        self.client.spawn(messages, observer)
    }

    /// Stream a reply to an order request and extract the structured items
    /// once it is complete.
    pub fn parse_order<O>(
        &self,
        catalog: &[CatalogEntry],
        history: &[ChatMessage],
        user_text: &str,
        observer: O,
    ) -> StreamSession
    where
        O: OrderObserver + 'static,
    {
        let messages = build_order_context(catalog, history, user_text);
        self.client.spawn(messages, OrderStream { inner: observer })
    }

    /// Run an order-parsing call to the end and return the collected reply.
    /// `on_chunk` still sees the text as it arrives.
    pub async fn parse_order_collect<F>(
        &self,
        catalog: &[CatalogEntry],
        history: &[ChatMessage],
        user_text: &str,
        on_chunk: F,
    ) -> Result<OrderReply, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        let messages = build_order_context(catalog, history, user_text);
        let mut observer = Callbacks::new(on_chunk, |_: &str| {}, |_: &StreamError| {});
        let text = self
            .client
            .run(&messages, &mut observer, &CancellationToken::new())
            .await
            .into_result()?;

        let items = extract_order_or_empty(&text);
        let matched = match_items(&items, catalog, self.settings.match_threshold);
        if !matched.is_complete() {
            tracing::info!(
                unmatched = matched.unmatched.len(),
                "some ordered items are not on the menu"
            );
        }
        Ok(OrderReply {
            text,
            items,
            matched,
        })
    }
}
