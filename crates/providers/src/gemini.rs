use anyhow::Result;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::ChatMessage;
use shared::settings::StreamSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{FrameError, StreamError};
use crate::session::{SessionOutcome, StreamObserver, StreamSession};
use crate::sse::{FramePolicy, SseEvent, SseParser};

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: &'a [ChatMessage],
}

// ── Streaming response types ─────────────────────────────────────────
//
// Everything is optional: a fragment that lacks a field is simply a
// fragment without text, never a parse failure.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Option<Vec<GeminiCandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Pull the text delta out of one streamed fragment.
///
/// Only `candidates[0].content.parts[0].text` is read. A fragment without
/// that text, or with an empty string, yields `Ok(None)`.
pub fn extract_delta(data: &str) -> Result<Option<String>, serde_json::Error> {
    let fragment: GeminiStreamResponse = serde_json::from_str(data)?;

    if let Some(err) = &fragment.error {
        tracing::warn!(
            code = ?err.code,
            status = ?err.status,
            "stream fragment carried an error: {}",
            err.message
        );
    }
    if let Some(tokens) = fragment
        .usage_metadata
        .as_ref()
        .and_then(|u| u.total_token_count)
    {
        tracing::trace!(tokens, "usage update");
    }

    let Some(candidate) = fragment.candidates.as_deref().and_then(|c| c.first()) else {
        return Ok(None);
    };
    if let Some(reason) = &candidate.finish_reason {
        tracing::debug!(finish_reason = %reason, "candidate finished");
    }

    Ok(candidate
        .content
        .as_ref()
        .and_then(|c| c.parts.as_deref())
        .and_then(|parts| parts.first())
        .and_then(|part| part.text.clone())
        .filter(|text| !text.is_empty()))
}

fn delta_from_event(event: &SseEvent) -> Option<String> {
    match extract_delta(&event.data) {
        Ok(delta) => delta,
        Err(e) => {
            let preview: String = event.data.chars().take(120).collect();
            tracing::warn!(error = %e, data = %preview, "skipping undecodable stream event");
            None
        }
    }
}

/// Turns response bytes into text deltas and keeps the running total.
///
/// One per session; nothing here is shared.
#[derive(Debug, Default)]
pub struct DeltaAssembler {
    frames: SseParser,
    text: String,
}

impl DeltaAssembler {
    pub fn new(policy: FramePolicy) -> Self {
        Self {
            frames: SseParser::with_policy(policy),
            text: String::new(),
        }
    }

    /// Decode one network read. `on_delta` sees each new piece of text right
    /// after it has been appended to the total.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_delta: F) -> Result<(), FrameError>
    where
        F: FnMut(&str),
    {
        let text = &mut self.text;
        self.frames.feed_with(chunk, |event| {
            if let Some(delta) = delta_from_event(&event) {
                text.push_str(&delta);
                on_delta(&delta);
            }
        })
    }

    pub fn finish<F>(&mut self, mut on_delta: F) -> Result<(), FrameError>
    where
        F: FnMut(&str),
    {
        let text = &mut self.text;
        self.frames.finish(|event| {
            if let Some(delta) = delta_from_event(&event) {
                text.push_str(&delta);
                on_delta(&delta);
            }
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Streams `streamGenerateContent`-style responses over SSE.
///
/// Cheap to clone; clones share the connection pool and settings.
#[derive(Clone)]
pub struct GeminiStreamClient {
    http: Client,
    settings: Arc<StreamSettings>,
}

impl GeminiStreamClient {
    pub fn new(settings: StreamSettings) -> Result<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(settings.connect_timeout_secs));
        if let Some(secs) = settings.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
            settings: Arc::new(settings),
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    fn frame_policy(&self) -> FramePolicy {
        if self.settings.strict_frames {
            FramePolicy::Strict
        } else {
            FramePolicy::Lenient
        }
    }

    /// Run one session to the end on the current task.
    ///
    /// Exactly one of `on_complete` / `on_error` is called unless `cancel`
    /// fires first, in which case neither is.
    pub async fn run(
        &self,
        messages: &[ChatMessage],
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        let session_id = Uuid::new_v4();
        tracing::debug!(%session_id, messages = messages.len(), "opening stream");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.pump(messages, &mut *observer, cancel) => Some(result),
        };

        match result {
            _ if cancel.is_cancelled() => {
                tracing::debug!(%session_id, "stream cancelled");
                SessionOutcome::Cancelled
            }
            Some(Ok(text)) => {
                tracing::debug!(%session_id, chars = text.len(), "stream complete");
                observer.on_complete(&text);
                SessionOutcome::Completed(text)
            }
            Some(Err(e)) => {
                tracing::warn!(%session_id, error = %e, "stream failed");
                observer.on_error(&e);
                SessionOutcome::Failed(e)
            }
            None => SessionOutcome::Cancelled,
        }
    }

    /// Start a session on the tokio runtime and hand back a handle to it.
    pub fn spawn<O>(&self, messages: Vec<ChatMessage>, mut observer: O) -> StreamSession
    where
        O: StreamObserver + 'static,
    {
        let client = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task =
            tokio::spawn(async move { client.run(&messages, &mut observer, &token).await });
        StreamSession::new(cancel, task)
    }

    async fn pump(
        &self,
        messages: &[ChatMessage],
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<String, StreamError> {
        let req = GeminiRequest { contents: messages };
        let mut request = self
            .http
            .post(&self.settings.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(
                self.settings.app_id_header.as_str(),
                self.settings.app_id.as_str(),
            )
            .json(&req);
        if let Some(key) = &self.settings.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let resp = request.send().await.map_err(StreamError::Connect)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body: String = body.trim().chars().take(800).collect();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut assembler = DeltaAssembler::new(self.frame_policy());
        let mut stream = resp.bytes_stream();
        let mut deliver = |delta: &str| {
            if !cancel.is_cancelled() {
                observer.on_chunk(delta);
            }
        };

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(StreamError::Read)?;
            assembler.push(&bytes, &mut deliver)?;
        }
        assembler.finish(&mut deliver)?;

        Ok(assembler.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use shared::agent_api::StreamChunk;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Chunk(String),
        Complete(String),
        Error(Option<u16>),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl StreamObserver for Recorder {
        fn on_chunk(&mut self, delta: &str) {
            self.calls.lock().push(Call::Chunk(delta.to_string()));
        }

        fn on_complete(&mut self, full_text: &str) {
            self.calls.lock().push(Call::Complete(full_text.to_string()));
        }

        fn on_error(&mut self, error: &StreamError) {
            self.calls.lock().push(Call::Error(error.status()));
        }
    }

    fn fragment(text: &str) -> String {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "index": 0
            }]
        })
        .to_string()
    }

    fn sse_body(texts: &[&str]) -> String {
        texts
            .iter()
            .map(|t| format!("data: {}\r\n\r\n", fragment(t)))
            .collect()
    }

    fn settings_for(server: &MockServer) -> StreamSettings {
        StreamSettings {
            endpoint: format!("{}/stream", server.uri()),
            app_id_header: "x-client-info".into(),
            app_id: "order-tests".into(),
            ..StreamSettings::default()
        }
    }

    fn sse_response(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    #[test]
    fn test_extract_delta_reads_first_text_part() {
        let delta = extract_delta(&fragment("Hello")).unwrap();
        assert_eq!(delta.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_extract_delta_tolerates_missing_shape() {
        for data in [
            r#"{}"#,
            r#"{"candidates":[]}"#,
            r#"{"candidates":null}"#,
            r#"{"candidates":[{"finishReason":"STOP","index":0}]}"#,
            r#"{"candidates":[{"content":{"parts":[]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"x"}}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":""}]}}]}"#,
            r#"{"error":{"code":429,"message":"slow down","status":"RESOURCE_EXHAUSTED"}}"#,
        ] {
            assert_eq!(extract_delta(data).unwrap(), None, "{}", data);
        }
    }

    #[test]
    fn test_extract_delta_rejects_non_json() {
        assert!(extract_delta("[DONE]").is_err());
        assert!(extract_delta(r#"{"candidates":"nope"}"#).is_err());
    }

    #[test]
    fn test_bad_event_does_not_sink_stream() {
        let body = format!(
            "data: {}\n\ndata: not json\n\ndata: {}\n\n",
            fragment("Two "),
            fragment("dosas")
        );
        let mut assembler = DeltaAssembler::default();
        let mut deltas = Vec::new();
        assembler
            .push(body.as_bytes(), |d| deltas.push(d.to_string()))
            .unwrap();
        assert_eq!(deltas, vec!["Two ", "dosas"]);
        assert_eq!(assembler.text(), "Two dosas");
    }

    #[test]
    fn test_rechunking_does_not_change_text() {
        let body = sse_body(&["Sure! ", "Adding 2 × Veg Biryani ", "(₹180 each).", "\n```json\n{}\n```"]);
        let bytes = body.as_bytes();
        let expected = "Sure! Adding 2 × Veg Biryani (₹180 each).\n```json\n{}\n```";

        let run = |chunks: Vec<&[u8]>| {
            let mut assembler = DeltaAssembler::default();
            let mut joined = String::new();
            for chunk in chunks {
                assembler.push(chunk, |d| joined.push_str(d)).unwrap();
            }
            assembler.finish(|d| joined.push_str(d)).unwrap();
            assert_eq!(joined, assembler.text());
            assembler.into_text()
        };

        for split in 0..=bytes.len() {
            assert_eq!(run(vec![&bytes[..split], &bytes[split..]]), expected);
        }
        for size in 1..=16 {
            assert_eq!(run(bytes.chunks(size).collect()), expected, "chunk size {}", size);
        }
    }

    #[tokio::test]
    async fn test_stream_delivers_chunks_then_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stream"))
            .and(header("x-client-info", "order-tests"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }]
            })))
            .respond_with(sse_response(sse_body(&["Hello", ", ", "world"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiStreamClient::new(settings_for(&server)).unwrap();
        let mut recorder = Recorder::default();
        let outcome = client
            .run(
                &[ChatMessage::user("hi")],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.text(), Some("Hello, world"));
        assert_eq!(
            recorder.calls(),
            vec![
                Call::Chunk("Hello".into()),
                Call::Chunk(", ".into()),
                Call::Chunk("world".into()),
                Call::Complete("Hello, world".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_success_status_reports_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiStreamClient::new(settings_for(&server)).unwrap();
        let mut recorder = Recorder::default();
        let outcome = client
            .run(
                &[ChatMessage::user("hi")],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        match outcome {
            SessionOutcome::Failed(StreamError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(recorder.calls(), vec![Call::Error(Some(500))]);
    }

    #[tokio::test]
    async fn test_connection_failure_reports_once() {
        let settings = StreamSettings {
            endpoint: "http://127.0.0.1:1/stream".into(),
            connect_timeout_secs: 2,
            ..StreamSettings::default()
        };
        let client = GeminiStreamClient::new(settings).unwrap();
        let mut recorder = Recorder::default();
        let outcome = client
            .run(
                &[ChatMessage::user("hi")],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(StreamError::Connect(_))
        ));
        assert_eq!(recorder.calls(), vec![Call::Error(None)]);
    }

    // Serves one request: a 200 promising more body than it sends, one
    // complete frame, then a closed socket.
    async fn serve_truncated_body(listener: tokio::net::TcpListener, frame: String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending the request");
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let body_len = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + body_len {
                    break;
                }
            }
        }

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: 10000\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(frame.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        socket.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_body_cut_short_reports_read_error_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_truncated_body(listener, sse_body(&["hi"])));

        let settings = StreamSettings {
            endpoint: format!("http://{}/stream", addr),
            ..StreamSettings::default()
        };
        let client = GeminiStreamClient::new(settings).unwrap();
        let mut recorder = Recorder::default();
        let outcome = client
            .run(
                &[ChatMessage::user("hi")],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;
        server.await.unwrap();

        assert!(matches!(
            outcome,
            SessionOutcome::Failed(StreamError::Read(_))
        ));
        assert_eq!(
            recorder.calls(),
            vec![Call::Chunk("hi".into()), Call::Error(None)]
        );
    }

    #[tokio::test]
    async fn test_strict_frames_fail_session() {
        let server = MockServer::start().await;
        let body = format!("data: {}\n\nbogus line\n\n", fragment("partial"));
        Mock::given(method("POST"))
            .respond_with(sse_response(body))
            .mount(&server)
            .await;

        let settings = StreamSettings {
            strict_frames: true,
            ..settings_for(&server)
        };
        let client = GeminiStreamClient::new(settings).unwrap();
        let mut recorder = Recorder::default();
        let outcome = client
            .run(
                &[ChatMessage::user("hi")],
                &mut recorder,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, SessionOutcome::Failed(StreamError::Frame(_))));
        assert_eq!(
            recorder.calls(),
            vec![Call::Chunk("partial".into()), Call::Error(None)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "table one" }] }]
            })))
            .respond_with(sse_response(sse_body(&["one ", "idli"])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "table two" }] }]
            })))
            .respond_with(sse_response(sse_body(&["two ", "vadas"])))
            .mount(&server)
            .await;

        let client = GeminiStreamClient::new(settings_for(&server)).unwrap();
        let first = Recorder::default();
        let second = Recorder::default();
        let a = client.spawn(vec![ChatMessage::user("table one")], first.clone());
        let b = client.spawn(vec![ChatMessage::user("table two")], second.clone());

        let (a, b) = tokio::join!(a.join(), b.join());
        assert_eq!(a.text(), Some("one idli"));
        assert_eq!(b.text(), Some("two vadas"));
        assert_eq!(
            first.calls().last(),
            Some(&Call::Complete("one idli".into()))
        );
        assert_eq!(
            second.calls().last(),
            Some(&Call::Complete("two vadas".into()))
        );
        assert!(!first.calls().contains(&Call::Chunk("vadas".into())));
        assert!(!second.calls().contains(&Call::Chunk("idli".into())));
    }

    #[tokio::test]
    async fn test_cancel_suppresses_callbacks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                sse_response(sse_body(&["too late"])).set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = GeminiStreamClient::new(settings_for(&server)).unwrap();
        let recorder = Recorder::default();
        let session = client.spawn(vec![ChatMessage::user("hi")], recorder.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), session.join())
            .await
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::Cancelled));
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_channel_observer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_response(sse_body(&["a", "b"])))
            .mount(&server)
            .await;

        let client = GeminiStreamClient::new(settings_for(&server)).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.spawn(vec![ChatMessage::user("hi")], tx).join().await;

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk);
        }
        assert_eq!(
            received,
            vec![
                StreamChunk::Text("a".into()),
                StreamChunk::Text("b".into()),
                StreamChunk::Done {
                    full_text: "ab".into()
                },
            ]
        );
    }
}
