use crate::{render_prompt, AgentContext, AgentSpec, PromptRegistry, ResponseCleaner};
use async_trait::async_trait;
use bloom_common::QueryCategory;
use bloom_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a specialist produced for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub output: String,
    pub category: QueryCategory,
    pub user_context_used: bool,
    /// Set when the model call failed and `output` is the fallback message.
    pub error: bool,
}

/// An agent that answers queries of one category.
#[async_trait]
pub trait WellnessAgent: Send + Sync {
    fn category(&self) -> QueryCategory;

    /// Never fails: model errors turn into the agent's fallback reply.
    async fn run(&self, query: &str, context: &AgentContext) -> AgentReply;
}

/// LLM-backed agent driven by an `AgentSpec`.
pub struct SpecialistAgent {
    spec: AgentSpec,
    llm: Arc<dyn LLMProvider>,
    cleaner: ResponseCleaner,
}

impl SpecialistAgent {
    pub fn new(spec: AgentSpec, llm: Arc<dyn LLMProvider>) -> Self {
        info!("{} agent initialized", spec.category);
        Self {
            spec,
            llm,
            cleaner: ResponseCleaner::new(),
        }
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }
}

#[async_trait]
impl WellnessAgent for SpecialistAgent {
    fn category(&self) -> QueryCategory {
        self.spec.category
    }

    async fn run(&self, query: &str, context: &AgentContext) -> AgentReply {
        let prompt = render_prompt(&self.spec, query, context);
        debug!(
            "Running {} agent (prompt {} chars, user context: {})",
            self.spec.category,
            prompt.len(),
            context.used_user_context
        );

        match self.llm.generate(&prompt, &self.spec.params).await {
            Ok(response) => {
                if let Some(reason) = &response.finish_reason {
                    debug!("{} completion finished: {}", self.spec.category, reason);
                }
                AgentReply {
                    output: self.cleaner.clean(&response.content, &self.spec),
                    category: self.spec.category,
                    user_context_used: context.used_user_context,
                    error: false,
                }
            }
            Err(e) => {
                warn!("{} agent LLM call failed: {:#}", self.spec.category, e);
                AgentReply {
                    output: self.spec.fallback_message.clone(),
                    category: self.spec.category,
                    user_context_used: false,
                    error: true,
                }
            }
        }
    }
}

/// One specialist per registered spec.
pub fn create_agents(
    llm: Arc<dyn LLMProvider>,
    registry: &PromptRegistry,
) -> Vec<Arc<dyn WellnessAgent>> {
    registry
        .all_specs()
        .into_iter()
        .map(|spec| {
            Arc::new(SpecialistAgent::new(spec.clone(), Arc::clone(&llm))) as Arc<dyn WellnessAgent>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bloom_llm::{GenerationParams, LLMResponse};
    use std::sync::Mutex;

    struct ScriptedLlm {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> anyhow::Result<LLMResponse> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Some(text) => Ok(LLMResponse::text(text.clone())),
                None => anyhow::bail!("endpoint unavailable"),
            }
        }
    }

    fn agent(category: QueryCategory, reply: Option<&str>) -> (SpecialistAgent, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        });
        let spec = PromptRegistry::new().get_spec(category).unwrap().clone();
        (SpecialistAgent::new(spec, llm.clone()), llm)
    }

    #[tokio::test]
    async fn test_run_cleans_model_output() {
        let (agent, llm) = agent(
            QueryCategory::Exercise,
            Some("Bloom: - **Walk** briskly for 20 minutes\n- Add two strength sessions each week"),
        );
        let reply = agent.run("How should I start exercising?", &AgentContext::empty()).await;

        assert!(!reply.error);
        assert_eq!(reply.category, QueryCategory::Exercise);
        assert_eq!(
            reply.output,
            "Walk briskly for 20 minutes. Add two strength sessions each week."
        );
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("\"How should I start exercising?\""));
    }

    #[tokio::test]
    async fn test_run_falls_back_on_llm_error() {
        let (agent, _) = agent(QueryCategory::Consultation, None);
        let reply = agent.run("I feel anxious", &AgentContext::empty()).await;

        assert!(reply.error);
        assert!(!reply.user_context_used);
        assert_eq!(reply.output, agent.spec().fallback_message);
    }

    #[test]
    fn test_create_agents_covers_all_categories() {
        let llm: Arc<dyn LLMProvider> = Arc::new(ScriptedLlm {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        });
        let agents = create_agents(llm, &PromptRegistry::new());
        let categories: Vec<QueryCategory> = agents.iter().map(|a| a.category()).collect();
        assert_eq!(categories, QueryCategory::ALL.to_vec());
    }
}
