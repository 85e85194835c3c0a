//! OpenAI-compatible chat completions oracle.

use std::time::Duration;

use async_trait::async_trait;
use patchloop_core::OracleConfig;
use patchloop_proto::{Oracle, OracleError, OracleRequest, OracleResponse, TokenUsage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

/// Oracle backed by `POST {api_base}/chat/completions`.
#[derive(Debug)]
pub struct OpenAiOracle {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiOracle {
    /// Builds the oracle, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                OracleError::NotConfigured(format!("{} is not set", config.api_key_env))
            })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &OracleConfig, api_key: impl Into<String>) -> Result<Self, OracleError> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }

    fn body(&self, request: &OracleRequest) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.context},
            ],
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Decodes a successful chat completions body.
fn parse_response(text: &str) -> Result<OracleResponse, OracleError> {
    let response: ChatResponse =
        serde_json::from_str(text).map_err(|e| OracleError::Malformed(e.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::Malformed("response contained no choices".to_string()))?;
    Ok(OracleResponse {
        text: choice.message.content.unwrap_or_default(),
        usage: response.usage,
        model: response.model,
    })
}

/// Best human-readable text for an error body.
fn error_message(text: &str) -> String {
    match serde_json::from_str::<ApiError>(text) {
        Ok(err) => err.error.message,
        Err(_) => text.chars().take(500).collect(),
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(url = %url, model = %self.model, phase = %request.phase, "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout.as_secs())
                } else {
                    OracleError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: error_message(&text),
            });
        }
        parse_response(&text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchloop_proto::Phase;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let reply = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (base, handle)
    }

    fn config(api_base: &str) -> OracleConfig {
        OracleConfig {
            api_base: api_base.to_string(),
            model: "test-model".to_string(),
            ..OracleConfig::default()
        }
    }

    fn request() -> OracleRequest {
        OracleRequest {
            phase: Phase::Plan,
            system: "plan it".to_string(),
            context: "README".to_string(),
        }
    }

    #[test]
    fn test_parse_response_with_usage() {
        let body = r#"{"model":"gpt-4.1-mini-2025","choices":[{"index":0,"message":{"role":"assistant","content":"1. do it"}}],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.text, "1. do it");
        assert_eq!(response.model.as_deref(), Some("gpt-4.1-mini-2025"));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_parse_response_without_choices() {
        assert!(matches!(
            parse_response(r#"{"choices":[]}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(parse_response("<html>"), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_error_message_prefers_api_detail() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#),
            "Rate limit reached"
        );
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn test_complete_round_trip() {
        let body = r#"{"choices":[{"message":{"content":"analysis"}}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let oracle = OpenAiOracle::new(&config(&format!("{base}/v1/")), "sk-test").unwrap();

        let response = oracle.complete(&request()).await.unwrap();
        assert_eq!(response.text, "analysis");
        assert_eq!(response.usage.unwrap().completion_tokens, 2);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw.contains("\"model\":\"test-model\""));
        assert!(raw.contains("plan it"));
    }

    #[tokio::test]
    async fn test_complete_http_error() {
        let (base, server) =
            serve_once("429 Too Many Requests", r#"{"error":{"message":"slow down"}}"#).await;
        let oracle = OpenAiOracle::new(&config(&base), "sk-test").unwrap();

        let err = oracle.complete(&request()).await.unwrap_err();
        match err {
            OracleError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let config = OracleConfig {
            api_key_env: "PATCHLOOP_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..OracleConfig::default()
        };
        assert!(matches!(
            OpenAiOracle::from_config(&config),
            Err(OracleError::NotConfigured(_))
        ));
    }
}
