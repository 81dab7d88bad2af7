// Local-inference provider speaking the Ollama HTTP API

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{GenerateRequest, LlmProvider};

/// Provider for a local Ollama-style inference endpoint
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct OllamaGenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn body<'a>(&self, request: &'a GenerateRequest, stream: bool) -> OllamaGenerateBody<'a> {
        OllamaGenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream,
            options: OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(|e| format!("Ollama request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Ollama API error ({}): {}", status, body));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Invalid Ollama response: {}", e))?;
        Ok(parsed.response)
    }

    async fn stream(
        &self,
        request: &GenerateRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<String, String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.body(request, true))
            .send()
            .await
            .map_err(|e| format!("Ollama request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Ollama API error ({}): {}", status, body));
        }

        // The streaming endpoint emits one JSON object per line
        let mut assembled = String::new();
        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("Ollama stream failed: {}", e))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<OllamaGenerateResponse>(line) {
                    Ok(parsed) => {
                        if !parsed.response.is_empty() {
                            assembled.push_str(&parsed.response);
                            let _ = tx.send(parsed.response);
                        }
                        if parsed.done {
                            return Ok(assembled);
                        }
                    }
                    Err(_) => continue,
                }
            }
        }

        Ok(assembled)
    }

    async fn health_check(&self, model: &str, timeout: Duration) -> bool {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(timeout)
            .send();

        match request.await {
            Ok(response) if response.status().is_success() => {
                match response.json::<OllamaTagsResponse>().await {
                    Ok(tags) => tags.models.iter().any(|m| m.name == model),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_generate_body_shape() {
        let provider = OllamaProvider::new("http://localhost:11434");
        let request = GenerateRequest {
            model: "gemma3:4b".to_string(),
            prompt: "hello".to_string(),
            temperature: 0.3,
            top_p: 0.95,
        };
        let body = serde_json::to_value(provider.body(&request, false)).unwrap();
        assert_eq!(body["model"], "gemma3:4b");
        assert_eq!(body["stream"], false);
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_stream_line_parses() {
        let line = r#"{"response":"chunk","done":false}"#;
        let parsed: OllamaGenerateResponse = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.response, "chunk");
        assert!(!parsed.done);
    }
}
