use bloom_agent::RoutingStrategy;
use bloom_common::{BloomError, Result};
use bloom_llm::{
    LLMConfig, ProviderKind, DEFAULT_IAM_URL, DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_URL,
    DEFAULT_WATSONX_MODEL, DEFAULT_WATSONX_URL,
};
use bloom_store::DEFAULT_MAX_HISTORY;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub frontend_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: split_list(DEFAULT_CORS_ORIGINS),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything the binary needs, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub routing: RoutingStrategy,
    /// `None` keeps users in memory only.
    pub db_path: Option<PathBuf>,
    /// Interactions kept per user, by either store.
    pub history_limit: usize,
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let server = ServerConfig {
            host: get("BLOOM_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_var("BLOOM_PORT", get("BLOOM_PORT"), DEFAULT_PORT)?,
            cors_origins: split_list(
                &get("BLOOM_CORS_ORIGINS").unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string()),
            ),
            frontend_url: get("BLOOM_FRONTEND_URL")
                .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_string()),
        };

        let provider = match get("LLM_PROVIDER") {
            Some(raw) => ProviderKind::from_str(&raw).map_err(|e| BloomError::Config(e.to_string()))?,
            None => ProviderKind::Watsonx,
        };

        let max_retries = parse_var("LLM_MAX_RETRIES", get("LLM_MAX_RETRIES"), 2u32)?;
        let timeout_secs = parse_var("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"), 60u64)?;
        if timeout_secs == 0 {
            return Err(BloomError::Config("LLM_TIMEOUT_SECS must be positive".to_string()));
        }

        let llm = match provider {
            ProviderKind::Watsonx => LLMConfig {
                provider,
                api_key: get("API_KEY").unwrap_or_default(),
                base_url: get("URL").unwrap_or_else(|| DEFAULT_WATSONX_URL.to_string()),
                auth_url: DEFAULT_IAM_URL.to_string(),
                project_id: get("PROJECT_ID"),
                model: get("MODEL_ID").unwrap_or_else(|| DEFAULT_WATSONX_MODEL.to_string()),
                max_retries,
                timeout: Duration::from_secs(timeout_secs),
            },
            ProviderKind::OpenAI => LLMConfig {
                provider,
                api_key: get("OPENAI_API_KEY").or_else(|| get("API_KEY")).unwrap_or_default(),
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
                auth_url: String::new(),
                project_id: None,
                model: get("MODEL_ID").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                max_retries,
                timeout: Duration::from_secs(timeout_secs),
            },
        };

        let routing = match get("BLOOM_ROUTING") {
            Some(raw) => RoutingStrategy::from_str(&raw).map_err(|e| BloomError::Config(e.to_string()))?,
            None => RoutingStrategy::Hybrid,
        };

        let history_limit = parse_var("BLOOM_HISTORY_LIMIT", get("BLOOM_HISTORY_LIMIT"), DEFAULT_MAX_HISTORY)?;
        if history_limit == 0 {
            return Err(BloomError::Config("BLOOM_HISTORY_LIMIT must be positive".to_string()));
        }

        Ok(Self {
            server,
            llm,
            routing,
            db_path: get("BLOOM_DB_PATH").map(PathBuf::from),
            history_limit,
        })
    }
}

fn parse_var<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse()
            .map_err(|e| BloomError::Config(format!("Invalid {} '{}': {}", key, value, e))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.bind_address(), "0.0.0.0:5000");
        assert_eq!(
            config.server.cors_origins,
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );
        assert_eq!(config.llm.provider, ProviderKind::Watsonx);
        assert_eq!(config.llm.model, DEFAULT_WATSONX_MODEL);
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.routing, RoutingStrategy::Hybrid);
        assert!(config.db_path.is_none());
        assert_eq!(config.history_limit, DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn test_watsonx_variables() {
        let config = config_from(&[
            ("URL", "https://eu-de.ml.cloud.ibm.com"),
            ("API_KEY", "secret"),
            ("PROJECT_ID", "proj-1"),
            ("MODEL_ID", "ibm/granite-13b-chat-v2"),
            ("BLOOM_PORT", "8080"),
            ("BLOOM_ROUTING", "keyword"),
            ("BLOOM_DB_PATH", "/tmp/bloom.db"),
        ])
        .unwrap();

        assert_eq!(config.llm.base_url, "https://eu-de.ml.cloud.ibm.com");
        assert_eq!(config.llm.api_key, "secret");
        assert_eq!(config.llm.project_id.as_deref(), Some("proj-1"));
        assert_eq!(config.llm.model, "ibm/granite-13b-chat-v2");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.routing, RoutingStrategy::Keyword);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/bloom.db")));
    }

    #[test]
    fn test_openai_variables() {
        let config = config_from(&[
            ("LLM_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
        ])
        .unwrap();

        assert_eq!(config.llm.provider, ProviderKind::OpenAI);
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.base_url, "http://localhost:11434/v1");
        assert_eq!(config.llm.model, DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for pairs in [
            [("BLOOM_PORT", "not-a-port")],
            [("LLM_PROVIDER", "gemini")],
            [("BLOOM_ROUTING", "random")],
            [("LLM_TIMEOUT_SECS", "0")],
            [("BLOOM_HISTORY_LIMIT", "-3")],
        ] {
            let err = config_from(&pairs).unwrap_err();
            assert!(matches!(err, BloomError::Config(_)), "{:?} gave {:?}", pairs, err);
        }
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config_from(&[("BLOOM_HOST", "  "), ("BLOOM_CORS_ORIGINS", " a , ,b ")]).unwrap();
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.cors_origins, vec!["a", "b"]);
    }
}
