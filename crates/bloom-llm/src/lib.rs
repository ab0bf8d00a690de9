mod openai;
mod retry;
mod watsonx;

pub use openai::OpenAIClient;
pub use retry::{CallError, RetryPolicy};
pub use watsonx::WatsonxClient;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_WATSONX_URL: &str = "https://us-south.ml.cloud.ibm.com";
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com/identity/token";
pub const DEFAULT_WATSONX_MODEL: &str = "ibm/granite-3-8b-instruct";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl LLMResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            usage: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decoding {
    Greedy,
    Sample,
}

/// Sampling settings sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub decoding: Decoding,
    pub temperature: f32,
    pub min_new_tokens: u32,
    pub max_new_tokens: u32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            decoding: Decoding::Greedy,
            temperature: 0.3,
            min_new_tokens: 10,
            max_new_tokens: 150,
            stop_sequences: [
                "Human:",
                "Observation",
                "USER QUESTION:",
                "ASSISTANT:",
                "User:",
                "Assistant:",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl GenerationParams {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences = stops.into_iter().map(Into::into).collect();
        self
    }
}

/// A hosted completion endpoint.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<LLMResponse>;

    /// Providers without a chat API receive the messages as one labelled transcript.
    async fn generate_with_context(
        &self,
        messages: Vec<Message>,
        params: &GenerationParams,
    ) -> Result<LLMResponse> {
        let prompt = flatten_messages(&messages);
        self.generate(&prompt, params).await
    }
}

pub fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => m.content.clone(),
            Role::User => format!("User: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Watsonx,
    OpenAI,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watsonx" | "ibm" => Ok(ProviderKind::Watsonx),
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAI),
            other => anyhow::bail!("Unknown LLM provider '{}' (expected watsonx or openai)", other),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Watsonx => f.write_str("watsonx"),
            ProviderKind::OpenAI => f.write_str("openai"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub auth_url: String,
    pub project_id: Option<String>,
    pub model: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Watsonx,
            api_key: String::new(),
            base_url: DEFAULT_WATSONX_URL.to_string(),
            auth_url: DEFAULT_IAM_URL.to_string(),
            project_id: None,
            model: DEFAULT_WATSONX_MODEL.to_string(),
            max_retries: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

impl LLMConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

/// Build the provider selected by `config.provider`.
pub fn create_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match config.provider {
        ProviderKind::Watsonx => Arc::new(WatsonxClient::new(config.clone())?),
        ProviderKind::OpenAI => Arc::new(OpenAIClient::new(config.clone())?),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_messages() {
        let messages = vec![
            Message::system("You are Bloom."),
            Message::user("Hello"),
            Message {
                role: Role::Assistant,
                content: "Hi there".to_string(),
            },
        ];
        assert_eq!(
            flatten_messages(&messages),
            "You are Bloom.\n\nUser: Hello\n\nAssistant: Hi there"
        );
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("WatsonX".parse::<ProviderKind>().unwrap(), ProviderKind::Watsonx);
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert!("claude".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_default_params_carry_stop_sequences() {
        let params = GenerationParams::default();
        assert_eq!(params.decoding, Decoding::Greedy);
        assert_eq!(params.max_new_tokens, 150);
        assert!(params.stop_sequences.iter().any(|s| s == "Human:"));
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = LLMConfig::default();
        assert!(create_provider(&config).is_err());
    }
}
