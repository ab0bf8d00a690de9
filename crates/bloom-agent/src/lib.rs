mod cleaner;
mod context;
mod orchestrator;
mod prompt_registry;
mod router;
mod workers;

pub use cleaner::ResponseCleaner;
pub use context::{truncate_chars, AgentContext, ContextBuilder};
pub use orchestrator::{Orchestrator, OrchestratorReply, DEFAULT_MAX_QUERY_CHARS};
pub use prompt_registry::{render_prompt, AgentSpec, CleanupPolicy, PromptRegistry};
pub use router::{
    keyword_decision, parse_category_reply, QueryRouter, RoutingDecision, RoutingMethod,
    RoutingStrategy,
};
pub use workers::{create_agents, AgentReply, SpecialistAgent, WellnessAgent};
