use crate::{CallError, Decoding, GenerationParams, LLMConfig, LLMProvider, LLMResponse, RetryPolicy, Usage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info};

const API_VERSION: &str = "2023-05-29";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// IBM watsonx.ai text generation client.
pub struct WatsonxClient {
    api_key: String,
    base_url: String,
    auth_url: String,
    project_id: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    results: Vec<GenerationResult>,
}

#[derive(Debug, Deserialize)]
struct GenerationResult {
    #[serde(default)]
    generated_text: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    generated_token_count: Option<usize>,
    #[serde(default)]
    input_token_count: Option<usize>,
}

impl WatsonxClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("watsonx API key is required (set API_KEY)");
        }
        let project_id = config
            .project_id
            .clone()
            .filter(|p| !p.trim().is_empty())
            .context("watsonx project id is required (set PROJECT_ID)")?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            retry: config.retry_policy(),
            api_key: config.api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_url: config.auth_url,
            project_id,
            model: config.model,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn generation_url(&self) -> String {
        format!("{}/ml/v1/text/generation?version={}", self.base_url, API_VERSION)
    }

    pub(crate) fn request_body(&self, prompt: &str, params: &GenerationParams) -> serde_json::Value {
        let mut parameters = json!({
            "decoding_method": params.decoding,
            "min_new_tokens": params.min_new_tokens,
            "max_new_tokens": params.max_new_tokens,
            "stop_sequences": params.stop_sequences,
        });
        if params.decoding == Decoding::Sample {
            parameters["temperature"] = json!(params.temperature);
        }

        json!({
            "model_id": self.model,
            "project_id": self.project_id,
            "input": prompt,
            "parameters": parameters,
        })
    }

    async fn bearer_token(&self) -> Result<String, CallError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting IAM access token");
        let response = self
            .client
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CallError::Retryable(anyhow::Error::new(e).context("Failed to reach IAM token endpoint")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status("IAM", status, &error_text));
        }

        let token: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| CallError::Fatal(anyhow::Error::new(e).context("Failed to parse IAM token response")))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN);
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at,
        });

        Ok(token.access_token)
    }

    async fn perform_api_call(&self, body: &serde_json::Value) -> Result<LLMResponse, CallError> {
        let token = self.bearer_token().await?;

        let response = self
            .client
            .post(self.generation_url())
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Retryable(anyhow::Error::new(e).context("Failed to send request to watsonx")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked or expired early: drop it so the retry fetches a new one.
            self.token.lock().await.take();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CallError::Retryable(anyhow::anyhow!(
                "watsonx rejected the access token: {}",
                error_text
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status("watsonx", status, &error_text));
        }

        let parsed: GenerationResponse = response
            .json()
            .await
            .map_err(|e| CallError::Fatal(anyhow::Error::new(e).context("Failed to parse watsonx response")))?;

        parse_generation(parsed).map_err(CallError::Fatal)
    }
}

fn parse_generation(response: GenerationResponse) -> Result<LLMResponse> {
    let result = response
        .results
        .into_iter()
        .next()
        .context("watsonx response contained no results")?;

    let usage = match (result.input_token_count, result.generated_token_count) {
        (None, None) => None,
        (input, generated) => {
            let prompt_tokens = input.unwrap_or(0);
            let completion_tokens = generated.unwrap_or(0);
            Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            })
        }
    };

    Ok(LLMResponse {
        content: result.generated_text,
        finish_reason: result.stop_reason,
        usage,
    })
}

#[async_trait]
impl LLMProvider for WatsonxClient {
    fn name(&self) -> &str {
        "watsonx"
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<LLMResponse> {
        info!("Generating response with watsonx model {}", self.model);
        debug!("Prompt length: {} chars", prompt.len());

        let body = self.request_body(prompt, params);
        self.retry
            .run("watsonx", || self.perform_api_call(&body))
            .await
    }
}
