use crate::{
    create_agents, AgentContext, ContextBuilder, PromptRegistry, QueryRouter, RoutingDecision,
    RoutingStrategy, WellnessAgent,
};
use bloom_common::{BloomError, Interaction, QueryCategory, Result, UserProfile};
use bloom_llm::LLMProvider;
use bloom_store::UserStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_QUERY_CHARS: usize = 2000;

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorReply {
    /// `None` for anonymous direct calls.
    pub user_id: Option<String>,
    pub query: String,
    pub response: String,
    pub category: QueryCategory,
    pub routing: RoutingDecision,
    pub user_context_used: bool,
    /// The agent answered with its fallback message.
    pub error: bool,
}

/// Validates queries, routes them, runs the chosen agent and keeps user history.
pub struct Orchestrator {
    router: QueryRouter,
    agents: HashMap<QueryCategory, Arc<dyn WellnessAgent>>,
    store: Arc<dyn UserStore>,
    context_builder: ContextBuilder,
    max_query_chars: usize,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LLMProvider>, store: Arc<dyn UserStore>) -> Self {
        let registry = PromptRegistry::new();
        let agents: HashMap<_, _> = create_agents(Arc::clone(&llm), &registry)
            .into_iter()
            .map(|agent| (agent.category(), agent))
            .collect();

        info!("Orchestrator ready with {} agents", agents.len());
        Self {
            router: QueryRouter::new(llm),
            agents,
            store,
            context_builder: ContextBuilder::default(),
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
        }
    }

    pub fn with_routing_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.router = self.router.with_strategy(strategy);
        self
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    pub fn with_max_query_chars(mut self, max_query_chars: usize) -> Self {
        self.max_query_chars = max_query_chars;
        self
    }

    /// Replace the agent for its category.
    pub fn with_agent(mut self, agent: Arc<dyn WellnessAgent>) -> Self {
        self.agents.insert(agent.category(), agent);
        self
    }

    pub fn routing_strategy(&self) -> RoutingStrategy {
        self.router.strategy()
    }

    /// Route a user's query to the best agent and record the exchange.
    pub async fn run_categorization_pipeline(
        &self,
        query: &str,
        user_id: &str,
    ) -> Result<OrchestratorReply> {
        let (query, user_id) = self.validate_user_query(query, user_id)?;
        info!("Processing query for user {}", user_id);

        let routing = self.router.route(query).await;
        debug!("Keyword scores: {:?}", routing.scores);

        self.answer_for_user(query, user_id, routing).await
    }

    /// Same as `run_categorization_pipeline`, always answered by the basic agent.
    pub async fn run_basic_query_agent(&self, query: &str, user_id: &str) -> Result<OrchestratorReply> {
        let (query, user_id) = self.validate_user_query(query, user_id)?;
        info!("Processing basic query for user {}", user_id);

        self.answer_for_user(query, user_id, RoutingDecision::direct(QueryCategory::BasicQuery))
            .await
    }

    /// Anonymous call to one agent. Nothing is loaded or recorded.
    pub async fn run_direct(&self, category: QueryCategory, query: &str) -> Result<OrchestratorReply> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BloomError::Validation("Empty query provided".to_string()));
        }
        self.check_length(query)?;

        let agent = self.agent(category)?;
        let reply = agent.run(query, &AgentContext::empty()).await;

        Ok(OrchestratorReply {
            user_id: None,
            query: query.to_string(),
            response: reply.output,
            category,
            routing: RoutingDecision::direct(category),
            user_context_used: false,
            error: reply.error,
        })
    }

    pub async fn register_profile(&self, user_id: &str, profile: UserProfile) -> Result<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(BloomError::Validation("Empty user_id provided".to_string()));
        }
        self.store.save_profile(user_id, profile).await?;
        info!("Registered profile for user {}", user_id);
        Ok(())
    }

    /// The newest `limit` interactions, oldest first.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        self.store.recent_interactions(user_id.trim(), limit).await
    }

    pub async fn clear_history(&self, user_id: &str) -> Result<usize> {
        let removed = self.store.clear_history(user_id.trim()).await?;
        info!("Cleared {} interactions for user {}", removed, user_id.trim());
        Ok(removed)
    }

    fn validate_user_query<'a>(&self, query: &'a str, user_id: &'a str) -> Result<(&'a str, &'a str)> {
        let query = query.trim();
        let user_id = user_id.trim();
        if query.is_empty() || user_id.is_empty() {
            return Err(BloomError::Validation(
                "Empty query or user_id provided".to_string(),
            ));
        }
        self.check_length(query)?;
        Ok((query, user_id))
    }

    fn check_length(&self, query: &str) -> Result<()> {
        let chars = query.chars().count();
        if chars > self.max_query_chars {
            return Err(BloomError::Validation(format!(
                "Query is too long ({} characters, limit {})",
                chars, self.max_query_chars
            )));
        }
        Ok(())
    }

    fn agent(&self, category: QueryCategory) -> Result<&Arc<dyn WellnessAgent>> {
        self.agents
            .get(&category)
            .ok_or_else(|| BloomError::Config(format!("No agent registered for {}", category)))
    }

    async fn load_context(&self, user_id: &str) -> AgentContext {
        let profile = match self.store.profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Could not load profile for {}: {}", user_id, e);
                None
            }
        };

        let history = match self
            .store
            .recent_interactions(user_id, self.context_builder.history_window())
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("Could not load history for {}: {}", user_id, e);
                Vec::new()
            }
        };

        self.context_builder.build(profile.as_ref(), &history)
    }

    async fn answer_for_user(
        &self,
        query: &str,
        user_id: &str,
        routing: RoutingDecision,
    ) -> Result<OrchestratorReply> {
        let agent = self.agent(routing.category)?;
        let context = self.load_context(user_id).await;
        let reply = agent.run(query, &context).await;

        if reply.error {
            warn!("{} agent returned its fallback for user {}", reply.category, user_id);
        } else {
            let interaction = Interaction::new(user_id, query, reply.output.as_str(), reply.category);
            if let Err(e) = self.store.record_interaction(interaction).await {
                warn!("Failed to record interaction for {}: {}", user_id, e);
            }
        }

        Ok(OrchestratorReply {
            user_id: Some(user_id.to_string()),
            query: query.to_string(),
            response: reply.output,
            category: reply.category,
            routing,
            user_context_used: reply.user_context_used,
            error: reply.error,
        })
    }
}
