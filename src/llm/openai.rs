use super::{LlmError, StreamChunk};
use crate::config::mask_secret;
use crate::store::models::Message;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiResponse {
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
struct OpenAiStreamResponse {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

/// One meaningful line of a `text/event-stream` body.
#[derive(Debug, PartialEq, Eq)]
enum StreamLine {
    Delta {
        content: Option<String>,
        finished: bool,
    },
    Done,
}

fn build_request(
    config: &OpenAiConfig,
    messages: &[Message],
    stream: bool,
) -> RequestBuilder {
    let body = OpenAiRequest {
        model: &config.model,
        messages,
        temperature: config.temperature,
        stream,
    };

    let mut req = Client::new()
        .post(format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        ))
        .header("Content-Type", "application/json")
        .json(&body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }
    req
}

async fn send(req: RequestBuilder) -> Result<reqwest::Response, LlmError> {
    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }
    Ok(resp)
}

pub async fn chat(config: &OpenAiConfig, messages: &[Message]) -> Result<Message, LlmError> {
    debug!(model = %config.model, messages = messages.len(), "requesting completion");
    let resp = send(build_request(config, messages, false)).await?;

    let data: OpenAiResponse = resp
        .json()
        .await
        .map_err(|e| LlmError::Parse(e.to_string()))?;

    data.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(Message::assistant)
        .ok_or(LlmError::EmptyResponse)
}

pub async fn chat_stream(
    config: &OpenAiConfig,
    messages: &[Message],
    on_chunk: impl Fn(StreamChunk) + Send,
) -> Result<Message, LlmError> {
    debug!(model = %config.model, messages = messages.len(), "streaming completion");
    let resp = send(build_request(config, messages, true)).await?;

    let mut full_content = String::new();
    let mut received = false;
    let mut stream = resp.bytes_stream();
    // Raw bytes so a UTF-8 sequence split across chunks is decoded whole.
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);

            match parse_stream_line(&line) {
                Some(StreamLine::Done) => return finish(full_content, received, &on_chunk),
                Some(StreamLine::Delta { content, finished }) => {
                    if let Some(content) = content {
                        received = true;
                        full_content.push_str(&content);
                        on_chunk(StreamChunk {
                            delta: content,
                            done: false,
                        });
                    }
                    if finished {
                        return finish(full_content, received, &on_chunk);
                    }
                }
                None => {}
            }
        }
    }

    finish(full_content, received, &on_chunk)
}

fn finish(
    content: String,
    received: bool,
    on_chunk: &impl Fn(StreamChunk),
) -> Result<Message, LlmError> {
    on_chunk(StreamChunk {
        delta: String::new(),
        done: true,
    });
    if !received {
        return Err(LlmError::EmptyResponse);
    }
    Ok(Message::assistant(content))
}

/// `None` for comments, keep-alives, other SSE fields and payloads that do
/// not look like a completion chunk.
fn parse_stream_line(line: &str) -> Option<StreamLine> {
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(StreamLine::Done);
    }

    let parsed: OpenAiStreamResponse = serde_json::from_str(data).ok()?;
    let choice = parsed.choices.into_iter().next()?;
    Some(StreamLine::Delta {
        content: choice.delta.content,
        finished: choice.finish_reason.is_some(),
    })
}
