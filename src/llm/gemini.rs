//! Google Gemini provider implementation
//!
//! Talks to `streamGenerateContent` in SSE mode and turns each event
//! payload into text increments.

use super::types::{LlmRequest, ProviderStream, StreamEvent, SystemContent, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use memchr::memchr;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

const DIRECT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Only connection setup is bounded; a long reply may stream for minutes.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gemini service implementation, bound to one model
pub struct GeminiService {
    client: Client,
    api_key: String,
    url: String,
    model_id: String,
}

impl GeminiService {
    pub fn new(api_key: String, model_id: &str, gateway: Option<&str>) -> Result<Self, LlmError> {
        let url = match gateway {
            Some(gw) => format!(
                "{}/gemini/v1beta/models/{model_id}:streamGenerateContent?alt=sse",
                gw.trim_end_matches('/')
            ),
            None => format!(
                "{DIRECT_BASE_URL}/v1beta/models/{model_id}:streamGenerateContent?alt=sse"
            ),
        };

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            url,
            model_id: model_id.to_string(),
        })
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = if request.system.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(
                    request
                        .system
                        .iter()
                        .map(|s: &SystemContent| s.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                )],
            })
        };

        let contents = request
            .messages
            .iter()
            .filter(|msg| !msg.text.is_empty())
            .map(|msg| GeminiContent {
                role: Some(msg.role.as_str().to_string()),
                parts: vec![GeminiPart::text(msg.text.clone())],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
        }
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn stream(&self, request: &LlmRequest) -> Result<ProviderStream, LlmError> {
        let gemini_request = Self::translate_request(request);

        let mut http = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&gemini_request);

        // Gateway mode authenticates on our behalf
        if !self.api_key.starts_with("implicit") {
            http = http.header("x-goog-api-key", &self.api_key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                .map_or(body, |resp| resp.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| LlmError::from_transport(&e)));

        Ok(decode_event_stream(body))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Response decoding
// ============================================================================

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, LlmError>>,
    finished: bool,
}

/// Turn a raw SSE body into provider events.
///
/// The first error ends the stream; nothing after it is yielded.
pub(crate) fn decode_event_stream<S, B>(body: S) -> ProviderStream
where
    S: Stream<Item = Result<B, LlmError>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.decoder.push(chunk.as_ref()) {
                        state.pending.extend(parse_payload(&payload));
                    }
                }
                Some(Err(e)) => state.pending.push_back(Err(e)),
                None => {
                    state.finished = true;
                    for payload in state.decoder.finish() {
                        state.pending.extend(parse_payload(&payload));
                    }
                }
            }
        }
    })
    .boxed()
}

/// Incremental `text/event-stream` decoder.
///
/// Lines are split on raw `\n` bytes before UTF-8 decoding, so a chunk
/// boundary inside a multi-byte character is harmless.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk, returning the data payloads of every completed event
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.process_line(&line[..newline_pos], &mut payloads);
        }

        payloads
    }

    /// Flush whatever is left once the body ends
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut payloads);
        }
        self.dispatch(&mut payloads);
        payloads
    }

    fn process_line(&mut self, line: &[u8], payloads: &mut Vec<String>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            self.dispatch(payloads);
            return;
        }

        let line = String::from_utf8_lossy(line);
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // event:, id:, retry: and comment lines carry nothing we use
    }

    fn dispatch(&mut self, payloads: &mut Vec<String>) {
        if !self.data.is_empty() {
            payloads.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

fn parse_payload(payload: &str) -> Vec<Result<StreamEvent, LlmError>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<GeminiStreamChunk>(trimmed) {
        Ok(chunk) => normalize_chunk(chunk),
        Err(e) => vec![Err(LlmError::unknown(format!(
            "Failed to parse stream chunk: {e} - payload: {trimmed}"
        )))],
    }
}

fn normalize_chunk(chunk: GeminiStreamChunk) -> Vec<Result<StreamEvent, LlmError>> {
    if let Some(error) = chunk.error {
        return vec![Err(LlmError::from_status(
            error.code.unwrap_or_default(),
            &error.message,
        ))];
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            return vec![Err(LlmError::blocked(format!("Prompt blocked: {reason}")))];
        }
        return Vec::new();
    };

    let mut events: Vec<Result<StreamEvent, LlmError>> = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|part| !part.thought)
        .filter_map(|part| part.text)
        .filter(|text| !text.is_empty())
        .map(|text| Ok(StreamEvent::Text(text)))
        .collect();

    if let Some(finish_reason) = candidate.finish_reason {
        let usage = chunk
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();
        events.push(Ok(StreamEvent::Finished {
            finish_reason: Some(finish_reason),
            usage,
        }));
    }

    events
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Thought summaries are not part of the visible reply
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            thought: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    code: Option<u16>,
}
