use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::{ConfigAi, DescriberBackend};

/// Produces a natural-language caption for an encoded image.
#[async_trait]
pub trait Describer: Send + Sync {
    /// Model identifier recorded next to every caption
    fn model(&self) -> &str;

    async fn describe(&self, image: &[u8]) -> Result<String, DescriberError>;
}

/// Picks the backend once, at startup.
pub fn from_config(cfg: &ConfigAi) -> Result<Box<dyn Describer>, DescriberError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .map_err(DescriberError::Client)?;
    debug!(backend = %cfg.api_type, model = %cfg.model, "Describer configured");
    Ok(match cfg.api_type {
        DescriberBackend::Ollama => Box::new(OllamaDescriber::new(client, cfg)),
        DescriberBackend::OpenAi => Box::new(OpenAiDescriber::new(client, cfg)),
    })
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, DescriberError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(DescriberError::Status(status.as_u16(), body))
}

/// Local model served by Ollama, streamed from `/api/generate`.
pub struct OllamaDescriber {
    client: reqwest::Client,
    url: String,
    model: String,
    prompt: String,
}

impl OllamaDescriber {
    pub fn new(client: reqwest::Client, cfg: &ConfigAi) -> Self {
        Self {
            client,
            url: endpoint(&cfg.base_url, "/api/generate"),
            model: cfg.model.clone(),
            prompt: cfg.prompt.clone(),
        }
    }

    fn request_body(&self, image: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": self.prompt,
            "images": [BASE64.encode(image)],
            "stream": true,
        })
    }
}

#[async_trait]
impl Describer for OllamaDescriber {
    fn model(&self) -> &str {
        &self.model
    }

    async fn describe(&self, image: &[u8]) -> Result<String, DescriberError> {
        let res = self
            .client
            .post(&self.url)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(DescriberError::Transport)?;
        let res = ensure_success(res).await?;

        let mut collector = ChunkCollector::default();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(DescriberError::Transport)?;
            if collector.push(&chunk)? {
                break;
            }
        }
        collector.finish()
    }
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// Reassembles newline-delimited JSON chunks that may be split anywhere by the transport.
#[derive(Default)]
struct ChunkCollector {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl ChunkCollector {
    /// Returns `true` once the backend marked the answer complete.
    fn push(&mut self, bytes: &[u8]) -> Result<bool, DescriberError> {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume(&line)?;
            if self.done {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn consume(&mut self, line: &[u8]) -> Result<(), DescriberError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let chunk: GenerateChunk = serde_json::from_slice(line)
            .map_err(|e| DescriberError::Malformed(format!("bad stream chunk: {}", e)))?;
        trace!(piece = %chunk.response, "Description chunk");
        if let Some(error) = chunk.error {
            return Err(DescriberError::Backend(error));
        }
        self.text.push_str(&chunk.response);
        self.done |= chunk.done;
        Ok(())
    }

    fn finish(mut self) -> Result<String, DescriberError> {
        if !self.done {
            let rest = std::mem::take(&mut self.pending);
            self.consume(&rest)?;
        }
        let text = self.text.trim();
        if text.is_empty() {
            return Err(DescriberError::Empty);
        }
        Ok(text.to_string())
    }
}

/// Hosted model behind an OpenAI-compatible chat completions API.
pub struct OpenAiDescriber {
    client: reqwest::Client,
    url: String,
    model: String,
    prompt: String,
    api_key: String,
    max_tokens: u32,
}

impl OpenAiDescriber {
    pub fn new(client: reqwest::Client, cfg: &ConfigAi) -> Self {
        Self {
            client,
            url: endpoint(&cfg.base_url, "/v1/chat/completions"),
            model: cfg.model.clone(),
            prompt: cfg.prompt.clone(),
            api_key: cfg.api_key.clone().unwrap_or_default(),
            max_tokens: cfg.max_tokens,
        }
    }

    fn request_body(&self, image: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": self.prompt},
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", mime::IMAGE_PNG, BASE64.encode(image)),
                            },
                        },
                    ],
                },
            ],
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl Describer for OpenAiDescriber {
    fn model(&self) -> &str {
        &self.model
    }

    async fn describe(&self, image: &[u8]) -> Result<String, DescriberError> {
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(image))
            .send()
            .await
            .map_err(DescriberError::Transport)?;
        let body = ensure_success(res)
            .await?
            .text()
            .await
            .map_err(DescriberError::Transport)?;
        parse_chat_completion(&body)
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn parse_chat_completion(body: &str) -> Result<String, DescriberError> {
    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| DescriberError::Malformed(format!("bad completion: {}", e)))?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| DescriberError::Malformed("completion has no message content".into()))?;
    let content = content.trim();
    if content.is_empty() {
        return Err(DescriberError::Empty);
    }
    Ok(content.to_string())
}

quick_error! {
    #[derive(Debug)]
    pub enum DescriberError {
        Client(error: reqwest::Error) {
            display("Description unavailable, HTTP client could not be built: {}", error)
            source(error)
        }
        Transport(error: reqwest::Error) {
            display("Description unavailable, request failed: {}", error)
            source(error)
        }
        Status(code: u16, body: String) {
            display("Description unavailable, backend answered {}: {}", code, body)
        }
        Malformed(reason: String) {
            display("Description unavailable, malformed response: {}", reason)
        }
        Backend(message: String) {
            display("Description unavailable, backend error: {}", message)
        }
        Empty {
            display("Description unavailable, backend returned no text")
        }
    }
}
