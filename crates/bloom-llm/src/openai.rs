use super::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

/// OpenAI's API accepts at most this many stop sequences.
const MAX_STOP_SEQUENCES: usize = 4;

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("OpenAI API key is required (set OPENAI_API_KEY)");
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            retry: config.retry_policy(),
            client,
            api_key: config.api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    fn request_body(&self, messages: &[Message], params: &GenerationParams) -> serde_json::Value {
        let openai_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role,
                    "content": msg.content
                })
            })
            .collect();

        let temperature = match params.decoding {
            Decoding::Greedy => 0.0,
            Decoding::Sample => params.temperature,
        };

        let mut body = json!({
            "model": self.model,
            "messages": openai_messages,
            "temperature": temperature,
            "max_tokens": params.max_new_tokens,
        });

        let stops: Vec<&String> = params.stop_sequences.iter().take(MAX_STOP_SEQUENCES).collect();
        if !stops.is_empty() {
            body["stop"] = json!(stops);
        }

        body
    }

    async fn perform_api_call(&self, body: &serde_json::Value) -> Result<LLMResponse, CallError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Retryable(anyhow::Error::new(e).context("Failed to send request to OpenAI")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status("OpenAI", status, &error_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CallError::Fatal(anyhow::Error::new(e).context("Failed to parse OpenAI response")))?;

        parse_completion(&json).map_err(CallError::Fatal)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<LLMResponse> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .context("Failed to extract text from OpenAI response")?
        .to_string();

    let usage = json["usage"].as_object().map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
    });

    Ok(LLMResponse {
        content,
        finish_reason: json["choices"][0]["finish_reason"]
            .as_str()
            .map(|s| s.to_string()),
        usage,
    })
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<LLMResponse> {
        self.generate_with_context(vec![Message::user(prompt)], params).await
    }

    async fn generate_with_context(
        &self,
        messages: Vec<Message>,
        params: &GenerationParams,
    ) -> Result<LLMResponse> {
        info!("Generating response with OpenAI model {}", self.model);

        let body = self.request_body(&messages, params);
        self.retry
            .run("OpenAI", || self.perform_api_call(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> OpenAIClient {
        OpenAIClient::new(LLMConfig {
            provider: ProviderKind::OpenAI,
            api_key: "sk-test".to_string(),
            base_url: "http://localhost:8080/v1/".to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_caps_stop_sequences() {
        let client = test_client();
        let body = client.request_body(&[Message::user("hi")], &GenerationParams::default());

        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["stop"].as_array().unwrap().len(), MAX_STOP_SEQUENCES);
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_parse_completion() {
        let json = json!({
            "choices": [{ "message": { "content": "Eat more leafy greens." }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18 }
        });
        let parsed = parse_completion(&json).unwrap();
        assert_eq!(parsed.content, "Eat more leafy greens.");
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn test_parse_completion_missing_content() {
        assert!(parse_completion(&json!({ "choices": [] })).is_err());
    }
}
