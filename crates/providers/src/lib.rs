//! Streaming client for the generative-text backend.
//!
//! - [`sse`]: incremental Server-Sent Events decoding
//! - [`gemini`]: fragment parsing, delta assembly and the session loop
//! - [`session`]: callback surface and cancellable session handle

pub mod error;
pub mod gemini;
pub mod session;
pub mod sse;

pub use error::{FrameError, StreamError};
pub use gemini::{DeltaAssembler, GeminiStreamClient};
pub use session::{Callbacks, SessionOutcome, StreamObserver, StreamSession};
pub use sse::{FramePolicy, SseEvent, SseParser, Utf8Decoder};
