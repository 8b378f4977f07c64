use thiserror::Error;

/// A frame the decoder could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unrecognized stream line: {line:?}")]
    MalformedLine { line: String },
}

/// Failures that end a streaming session.
///
/// Per-event decode problems never show up here; they are logged and the
/// stream keeps going. The exception is [`StreamError::Frame`], which only
/// happens when strict frame decoding is switched on.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream endpoint returned HTTP {status}{}", detail_suffix(.body))]
    Status { status: u16, body: String },

    #[error("could not reach stream endpoint: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("stream read error: {0}")]
    Read(#[source] reqwest::Error),

    #[error("malformed stream: {0}")]
    Frame(#[from] FrameError),

    #[error("stream session aborted: {0}")]
    Aborted(String),

    #[error("stream session cancelled")]
    Cancelled,
}

impl StreamError {
    /// HTTP status for a rejected request.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Status { status, .. } => Some(*status),
            StreamError::Connect(e) | StreamError::Read(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn detail_suffix(body: &str) -> String {
    if body.trim().is_empty() {
        String::new()
    } else {
        format!("\n{}", body)
    }
}
