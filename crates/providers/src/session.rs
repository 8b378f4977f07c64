//! Callback surface and lifecycle handle for one streaming session.

use shared::agent_api::StreamChunk;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

/// Receives the output of a streaming session.
///
/// Every `on_chunk` for a session happens before its single `on_complete`.
/// A session that fails calls `on_error` once and nothing afterwards; a
/// cancelled session goes quiet without calling either.
pub trait StreamObserver: Send {
    fn on_chunk(&mut self, delta: &str);
    fn on_complete(&mut self, full_text: &str);
    fn on_error(&mut self, error: &StreamError);
}

/// A [`StreamObserver`] built from three closures.
pub struct Callbacks<C, D, E> {
    on_chunk: C,
    on_complete: D,
    on_error: E,
}

impl<C, D, E> Callbacks<C, D, E>
where
    C: FnMut(&str) + Send,
    D: FnMut(&str) + Send,
    E: FnMut(&StreamError) + Send,
{
    pub fn new(on_chunk: C, on_complete: D, on_error: E) -> Self {
        Self {
            on_chunk,
            on_complete,
            on_error,
        }
    }
}

impl<C, D, E> StreamObserver for Callbacks<C, D, E>
where
    C: FnMut(&str) + Send,
    D: FnMut(&str) + Send,
    E: FnMut(&StreamError) + Send,
{
    fn on_chunk(&mut self, delta: &str) {
        (self.on_chunk)(delta)
    }

    fn on_complete(&mut self, full_text: &str) {
        (self.on_complete)(full_text)
    }

    fn on_error(&mut self, error: &StreamError) {
        (self.on_error)(error)
    }
}

// Channel delivery; a dropped receiver just means nobody is listening anymore.
impl StreamObserver for UnboundedSender<StreamChunk> {
    fn on_chunk(&mut self, delta: &str) {
        let _ = self.send(StreamChunk::Text(delta.to_string()));
    }

    fn on_complete(&mut self, full_text: &str) {
        let _ = self.send(StreamChunk::Done {
            full_text: full_text.to_string(),
        });
    }

    fn on_error(&mut self, error: &StreamError) {
        let _ = self.send(StreamChunk::Error(error.to_string()));
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed(String),
    Failed(StreamError),
    Cancelled,
}

impl SessionOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            SessionOutcome::Completed(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<String, StreamError> {
        match self {
            SessionOutcome::Completed(text) => Ok(text),
            SessionOutcome::Failed(e) => Err(e),
            SessionOutcome::Cancelled => Err(StreamError::Cancelled),
        }
    }
}

/// Handle to a session running on the tokio runtime.
///
/// Dropping the handle detaches the session; call [`cancel`](Self::cancel)
/// to stop it and close the connection.
#[derive(Debug)]
pub struct StreamSession {
    cancel: CancellationToken,
    task: JoinHandle<SessionOutcome>,
}

impl StreamSession {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<SessionOutcome>) -> Self {
        Self { cancel, task }
    }

    /// Stop the session. Callbacks that have not started yet are suppressed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> SessionOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => SessionOutcome::Cancelled,
            Err(e) => SessionOutcome::Failed(StreamError::Aborted(e.to_string())),
        }
    }
}
