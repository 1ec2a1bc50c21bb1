//! `TextGenerator` trait and the OpenAI-compatible `ApiTextGenerator`.
//!
//! The lyrics adapter only needs "prompt in, text out"; everything about the
//! concrete provider (URL, key, model, timeouts) lives in [`LlmConfig`].

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::LlmConfig;

// ---------------------------------------------------------------------------
// TextGenError
// ---------------------------------------------------------------------------

/// Failures of the generative-text backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextGenError {
    /// The provider asked us to slow down (HTTP 429).
    #[error("text generation rate limited")]
    RateLimited,

    /// No usable answer in time: request timeout, transport failure or 5xx.
    #[error("text generation timed out")]
    Timeout,

    /// The provider rejected the request or answered with something unusable.
    #[error("text generation request invalid: {0}")]
    InvalidRequest(String),
}

impl TextGenError {
    /// Rate limits and timeouts are worth retrying; rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout)
    }
}

impl From<reqwest::Error> for TextGenError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TextGenError::InvalidRequest(e.to_string())
        } else {
            TextGenError::Timeout
        }
    }
}

/// Error for a non-success HTTP status, `None` for 2xx.
fn classify_status(status: StatusCode) -> Option<TextGenError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(TextGenError::RateLimited)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Some(TextGenError::Timeout)
    } else {
        Some(TextGenError::InvalidRequest(format!("HTTP {status}")))
    }
}

// ---------------------------------------------------------------------------
// Prompt / TextGenerator
// ---------------------------------------------------------------------------

/// A chat-style prompt: one system message and one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Async trait for an external generative-text capability.
///
/// Implementors are shared as `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt, max_tokens: u32) -> Result<String, TextGenError>;
}

// ---------------------------------------------------------------------------
// ApiTextGenerator
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible `/v1/chat/completions` endpoint
/// (Ollama in OpenAI mode, OpenAI, Groq, LM Studio, vLLM ...).
pub struct ApiTextGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ApiTextGenerator {
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config: config.clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for ApiTextGenerator {
    /// The `Authorization: Bearer` header is only sent for a non-empty key.
    async fn generate(&self, prompt: &Prompt, max_tokens: u32) -> Result<String, TextGenError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = serde_json::json!({
            "model":       self.config.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user",   "content": prompt.user   }
            ],
            "stream":      false,
            "temperature": self.config.temperature,
            "max_tokens":  max_tokens
        });

        let mut req = self.client.post(&url).json(&body);
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if let Some(err) = classify_status(response.status()) {
            log::warn!("lyrics: backend answered {}", response.status());
            return Err(err);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            return Err(TextGenError::InvalidRequest(
                "response carried no message content".into(),
            ));
        }
        Ok(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: String) -> LlmConfig {
        LlmConfig {
            base_url,
            api_key: Some("sk-test".into()),
            model: "test-model".into(),
            temperature: 0.5,
            timeout_secs: 5,
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "be a rapper".into(),
            user: "write a hook".into(),
        }
    }

    /// Serves exactly one HTTP/1.1 response and returns the base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Read headers, then the announced body.
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let l = l.to_ascii_lowercase();
                            l.strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(TextGenError::RateLimited)
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            Some(TextGenError::Timeout)
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            Some(TextGenError::InvalidRequest(_))
        ));
    }

    #[test]
    fn only_rate_limit_and_timeout_are_transient() {
        assert!(TextGenError::RateLimited.is_transient());
        assert!(TextGenError::Timeout.is_transient());
        assert!(!TextGenError::InvalidRequest("x".into()).is_transient());
    }

    #[test]
    fn generator_is_object_safe() {
        let generator: Box<dyn TextGenerator> =
            Box::new(ApiTextGenerator::from_config(&config("http://localhost:1".into())));
        drop(generator);
    }

    #[tokio::test]
    async fn reads_message_content() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"  [Hook]\nrun it up  "}}]}"#,
        )
        .await;
        let text = ApiTextGenerator::from_config(&config(url))
            .generate(&prompt(), 64)
            .await
            .unwrap();
        assert_eq!(text, "[Hook]\nrun it up");
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let url = serve_once("HTTP/1.1 429 Too Many Requests", "{}").await;
        let err = ApiTextGenerator::from_config(&config(url))
            .generate(&prompt(), 64)
            .await
            .unwrap_err();
        assert_eq!(err, TextGenError::RateLimited);
    }

    #[tokio::test]
    async fn empty_content_is_invalid() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"choices":[]}"#).await;
        let err = ApiTextGenerator::from_config(&config(url))
            .generate(&prompt(), 64)
            .await
            .unwrap_err();
        assert!(matches!(err, TextGenError::InvalidRequest(_)));
    }
}
