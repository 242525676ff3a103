use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Incremental text deltas from a generation backend.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

const GENERATE_TIMEOUT: Duration = Duration::from_secs(180);
const OPENAI_SYSTEM: &str = "You are a helpful assistant.";

/// A text generation model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Full completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Completion for `prompt` as a stream of deltas. Backends without native
    /// streaming yield the whole answer as one delta.
    async fn stream_generate(&self, prompt: &str) -> Result<TokenStream> {
        let text = self.generate(prompt).await?;
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }
}

/// Generation over Ollama (`/api/generate`) or an OpenAI-compatible chat API.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpGenerator {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Result<Self> {
        match config.provider.as_str() {
            "ollama" | "openai" => Ok(Self { client, config }),
            other => Err(Error::Configuration(format!(
                "Unsupported LLM provider for generation: {other}"
            ))),
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn ollama_request(&self, prompt: &str, stream: bool) -> OllamaGenerateRequest {
        OllamaGenerateRequest {
            model: self.config.chat_model.clone(),
            prompt: prompt.to_string(),
            stream,
            keep_alive: self.config.keep_alive.clone(),
            options: OllamaOptions {
                num_predict: self.config.num_predict,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
        }
    }

    fn openai_request(&self, prompt: &str, stream: bool) -> OpenAiChatRequest {
        OpenAiChatRequest {
            model: self.config.chat_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: OPENAI_SYSTEM.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.config.temperature,
            stream,
        }
    }

    async fn send<T: Serialize>(
        &self,
        url: String,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.post(&url).json(body);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        if self.config.provider == "openai" {
            request = request.header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.as_deref().unwrap_or("")),
            );
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::backend("generation", format!("Failed to reach {url}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::backend(
                "generation",
                format!("{url} returned {status}: {text}"),
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match self.config.provider.as_str() {
            "ollama" => {
                let url = format!("{}/api/generate", self.base_url());
                let req = self.ollama_request(prompt, false);
                let resp = self.send(url, &req, Some(GENERATE_TIMEOUT)).await?;
                let body: OllamaGenerateChunk = resp.json().await.map_err(|e| {
                    Error::backend("generation", format!("Failed to parse Ollama response: {e}"))
                })?;
                Ok(body.response)
            }
            _ => {
                let url = format!("{}/v1/chat/completions", self.base_url());
                let req = self.openai_request(prompt, false);
                let resp = self.send(url, &req, Some(GENERATE_TIMEOUT)).await?;
                let body: OpenAiChatResponse = resp.json().await.map_err(|e| {
                    Error::backend("generation", format!("Failed to parse OpenAI response: {e}"))
                })?;
                Ok(body
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default())
            }
        }
    }

    async fn stream_generate(&self, prompt: &str) -> Result<TokenStream> {
        // No overall timeout: the relay owns the lifetime of a stream.
        match self.config.provider.as_str() {
            "ollama" => {
                let url = format!("{}/api/generate", self.base_url());
                let req = self.ollama_request(prompt, true);
                let resp = self.send(url, &req, None).await?;
                Ok(Box::pin(parse_stream(resp.bytes_stream(), parse_ollama_line)))
            }
            _ => {
                let url = format!("{}/v1/chat/completions", self.base_url());
                let req = self.openai_request(prompt, true);
                let resp = self.send(url, &req, None).await?;
                Ok(Box::pin(parse_stream(resp.bytes_stream(), parse_openai_line)))
            }
        }
    }
}

/// Apply a line parser to a byte stream. Malformed lines are logged and
/// skipped; transport errors are passed through.
fn parse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    parse: fn(&str) -> Option<Result<String>>,
) -> impl Stream<Item = Result<String>> + Send {
    stream_lines(byte_stream).filter_map(move |line_result| async move {
        match line_result {
            Ok(line) => match parse(&line) {
                Some(Err(Error::MalformedUpstreamEvent(msg))) => {
                    tracing::warn!("Skipping malformed generation event: {msg}");
                    None
                }
                other => other,
            },
            Err(e) => Some(Err(e)),
        }
    })
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    keep_alive: String,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct OllamaGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Parse a single Ollama NDJSON line. Returns:
/// - Some(Ok(delta)) for text deltas
/// - Some(Err(MalformedUpstreamEvent)) for unparseable lines
/// - None to skip (blank line, empty delta or done signal)
fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaGenerateChunk>(line) {
        Ok(chunk) => {
            if chunk.done || chunk.response.is_empty() {
                return None;
            }
            Some(Ok(chunk.response))
        }
        Err(e) => Some(Err(Error::MalformedUpstreamEvent(format!(
            "Ollama line: {e}"
        )))),
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

/// Parse a single OpenAI SSE line. Returns:
/// - Some(Ok(delta)) for content deltas
/// - Some(Err(MalformedUpstreamEvent)) for unparseable data lines
/// - None to skip (blank lines, non-data lines, [DONE], role-only chunks)
fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim();

    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(Error::MalformedUpstreamEvent(format!(
            "OpenAI chunk: {e}"
        )))),
    }
}

// ─── Line buffering ──────────────────────────────────────

/// Convert a byte stream into a stream of complete, non-blank lines.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new(), false),
        |(mut stream, mut buffer, finished)| async move {
            loop {
                // Split on raw bytes so multi-byte characters spanning two
                // network reads are decoded whole.
                if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let rest = buffer.split_off(newline_pos + 1);
                    let line = String::from_utf8_lossy(&buffer[..newline_pos]).into_owned();
                    buffer = rest;
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer, finished)));
                    }
                    continue;
                }

                if finished {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((
                            Err(Error::backend("generation", format!("Stream read error: {e}"))),
                            (stream, buffer, true),
                        ));
                    }
                    None => {
                        let remaining = String::from_utf8_lossy(&buffer).into_owned();
                        buffer.clear();
                        if !remaining.trim().is_empty() {
                            return Some((Ok(remaining), (stream, buffer, true)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Ollama parsing ──────────────────────────────────

    #[test]
    fn test_parse_ollama_chunk() {
        let line = r#"{"model":"m","response":"The main","done":false}"#;
        assert_eq!(parse_ollama_line(line).unwrap().unwrap(), "The main");
    }

    #[test]
    fn test_parse_ollama_done() {
        let line = r#"{"model":"m","response":"","done":true}"#;
        assert!(parse_ollama_line(line).is_none());
    }

    #[test]
    fn test_parse_ollama_empty_response() {
        let line = r#"{"response":"","done":false}"#;
        assert!(parse_ollama_line(line).is_none());
    }

    #[test]
    fn test_parse_ollama_malformed() {
        let result = parse_ollama_line("not valid json{{{");
        assert!(matches!(result, Some(Err(Error::MalformedUpstreamEvent(_)))));
    }

    // ─── OpenAI parsing ──────────────────────────────────

    #[test]
    fn test_parse_openai_data_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_openai_line(line).unwrap().unwrap(), "Hello");
    }

    #[test]
    fn test_parse_openai_data_line_without_space() {
        let line = r#"data:{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_openai_line(line).unwrap().unwrap(), "Hi");
    }

    #[test]
    fn test_parse_openai_done() {
        assert!(parse_openai_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_openai_role_only_chunk() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_openai_line(line).is_none());
    }

    #[test]
    fn test_parse_openai_malformed() {
        let result = parse_openai_line("data: {broken json");
        assert!(matches!(result, Some(Err(Error::MalformedUpstreamEvent(_)))));
    }

    #[test]
    fn test_parse_blank_and_non_data_lines() {
        assert!(parse_ollama_line("   ").is_none());
        assert!(parse_openai_line("").is_none());
        assert!(parse_openai_line("event: message").is_none());
    }

    // ─── Line buffering ──────────────────────────────────

    fn byte_chunks(
        parts: Vec<&'static [u8]>,
    ) -> impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static {
        stream::iter(parts.into_iter().map(|p| Ok(bytes::Bytes::from_static(p))))
    }

    #[tokio::test]
    async fn test_stream_lines_reassembles_split_lines() {
        let lines: Vec<String> = stream_lines(byte_chunks(vec![&b"ab"[..], &b"c\n\nde"[..], &b"f\ntail"[..]]))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["abc", "def", "tail"]);
    }

    #[tokio::test]
    async fn test_stream_lines_keeps_split_multibyte_chars() {
        // "é" is 0xC3 0xA9, split across two reads
        let lines: Vec<String> = stream_lines(byte_chunks(vec![&b"caf\xC3"[..], &b"\xA9\n"[..]]))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["café"]);
    }

    #[tokio::test]
    async fn test_parse_stream_skips_malformed_lines() {
        let body: Vec<&'static [u8]> = vec![
            &b"{\"response\":\"a\",\"done\":false}\n"[..],
            &b"garbage\n"[..],
            &b"{\"response\":\"b\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n"[..],
        ];
        let deltas: Vec<String> = parse_stream(byte_chunks(body), parse_ollama_line)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["a", "b"]);
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl Generator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_delta() {
        let deltas: Vec<String> = Fixed("whole answer")
            .stream_generate("q")
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["whole answer"]);
    }
}
