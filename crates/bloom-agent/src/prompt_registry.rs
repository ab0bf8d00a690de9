use crate::AgentContext;
use bloom_common::QueryCategory;
use bloom_llm::GenerationParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Post-processing switches for one agent's replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupPolicy {
    pub strip_markdown: bool,
    pub strip_disclaimers: bool,
}

/// Everything needed to prompt one specialist and tidy its answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub category: QueryCategory,
    pub description: String,
    /// Opening line of the prompt.
    pub persona: String,
    /// Heading for the instruction bullets.
    pub instructions_heading: String,
    pub instructions: Vec<String>,
    pub word_limit: usize,
    /// Last line of the prompt, inviting the answer.
    pub response_cue: String,
    pub params: GenerationParams,
    pub cleanup: CleanupPolicy,
    /// Appended to very short answers that do not already ask something.
    pub follow_up: String,
    /// Returned when the model fails or produces nothing usable.
    pub fallback_message: String,
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Registry of the specialist prompt templates.
pub struct PromptRegistry {
    specs: HashMap<QueryCategory, AgentSpec>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            specs: HashMap::new(),
        };
        registry.initialize_specs();
        registry
    }

    fn initialize_specs(&mut self) {
        let specs = vec![
            AgentSpec {
                category: QueryCategory::Consultation,
                description: "Symptoms, feelings and self-care for menopause experiences".to_string(),
                persona: "You are Bloom, a compassionate menopause wellness companion who helps women understand their experiences.".to_string(),
                instructions_heading: "RESPONSE REQUIREMENTS".to_string(),
                instructions: lines(&[
                    "Share practical wellness strategies and lifestyle approaches",
                    "Suggest specific remedies, self-care practices, or symptom management techniques",
                    "Be warm, understanding, and supportive",
                    "Give complete, helpful information",
                    "Avoid medical disclaimers or referral language",
                    "Focus on actionable advice and reassurance",
                ]),
                word_limit: 80,
                response_cue: "Your supportive response:".to_string(),
                params: GenerationParams::default()
                    .with_temperature(0.1)
                    .with_max_new_tokens(200)
                    .with_stop_sequences([
                        "Human:",
                        "Observation",
                        "Question:",
                        "USER:",
                        "ASSISTANT:",
                        "User previously asked:",
                        "You previously responded:",
                        "Consult",
                        "consult",
                        "healthcare provider",
                        "medical professional",
                        "doctor",
                    ]),
                cleanup: CleanupPolicy {
                    strip_markdown: false,
                    strip_disclaimers: true,
                },
                follow_up: "What would you like to know more about?".to_string(),
                fallback_message: "I'd love to help you with that. Can you tell me more about what you're experiencing specifically?".to_string(),
            },
            AgentSpec {
                category: QueryCategory::Exercise,
                description: "Exercise routines and movement for menopause health".to_string(),
                persona: "You are Bloom, a supportive fitness and wellness guide specializing in menopause health.".to_string(),
                instructions_heading: "INSTRUCTIONS".to_string(),
                instructions: lines(&[
                    "Provide practical, encouraging exercise advice for menopause wellness",
                    "Suggest specific exercises, routines, and movement strategies",
                    "Focus on strength, flexibility, cardiovascular health, and bone density",
                    "Be supportive and motivational",
                    "Use conversation history for context but don't repeat it",
                    "Don't use markdown formatting",
                    "Share actionable fitness guidance",
                ]),
                word_limit: 70,
                response_cue: "Your encouraging response:".to_string(),
                params: GenerationParams::default()
                    .with_temperature(0.1)
                    .with_stop_sequences([
                        "Human:",
                        "Observation",
                        "Question:",
                        "USER:",
                        "ASSISTANT:",
                        "User previously asked:",
                        "You previously responded:",
                    ]),
                cleanup: CleanupPolicy {
                    strip_markdown: true,
                    strip_disclaimers: false,
                },
                follow_up: "Would you like a simple routine to get started?".to_string(),
                fallback_message: "I apologize, but I'm having trouble processing your exercise question. Please try rephrasing your question or be more specific about your fitness goals.".to_string(),
            },
            AgentSpec {
                category: QueryCategory::Diet,
                description: "Nutrition, meals and hydration during menopause".to_string(),
                persona: "You are Bloom, a friendly nutrition guide specializing in menopause wellness.".to_string(),
                instructions_heading: "INSTRUCTIONS".to_string(),
                instructions: lines(&[
                    "Give practical, balanced nutrition advice for menopause wellness",
                    "Suggest specific foods, meals, and simple swaps",
                    "Consider bone health, heart health, energy, and symptom relief",
                    "Respect the user's dietary preferences and conditions",
                    "Use conversation history for context but don't repeat it",
                    "Don't use markdown formatting",
                ]),
                word_limit: 70,
                response_cue: "Your helpful response:".to_string(),
                params: GenerationParams::default()
                    .with_temperature(0.1)
                    .with_stop_sequences([
                        "Human:",
                        "Observation",
                        "Question:",
                        "USER:",
                        "ASSISTANT:",
                        "User previously asked:",
                        "You previously responded:",
                    ]),
                cleanup: CleanupPolicy {
                    strip_markdown: true,
                    strip_disclaimers: false,
                },
                follow_up: "Would you like some meal ideas?".to_string(),
                fallback_message: "I apologize, but I'm having trouble processing your nutrition question. Please try rephrasing it or tell me more about your eating habits.".to_string(),
            },
            AgentSpec {
                category: QueryCategory::BasicQuery,
                description: "General facts and definitions about menopause".to_string(),
                persona: "You are Bloom, a knowledgeable and friendly guide who explains menopause clearly.".to_string(),
                instructions_heading: "INSTRUCTIONS".to_string(),
                instructions: lines(&[
                    "Answer the question directly and accurately",
                    "Use simple, everyday language",
                    "Be warm and reassuring",
                    "Don't use markdown formatting",
                ]),
                word_limit: 60,
                response_cue: "Your clear answer:".to_string(),
                params: GenerationParams::default(),
                cleanup: CleanupPolicy {
                    strip_markdown: true,
                    strip_disclaimers: false,
                },
                follow_up: "What would you like to know more about?".to_string(),
                fallback_message: "I'm sorry, I couldn't answer that just now. Could you try asking in a different way?".to_string(),
            },
        ];

        for spec in specs {
            self.specs.insert(spec.category, spec);
        }
    }

    pub fn get_spec(&self, category: QueryCategory) -> Option<&AgentSpec> {
        self.specs.get(&category)
    }

    /// Replace or add a spec.
    pub fn register(&mut self, spec: AgentSpec) {
        self.specs.insert(spec.category, spec);
    }

    /// Specs in routing-priority order.
    pub fn all_specs(&self) -> Vec<&AgentSpec> {
        QueryCategory::ALL
            .iter()
            .filter_map(|c| self.specs.get(c))
            .collect()
    }

    /// Build the full prompt for `category`.
    pub fn render(&self, category: QueryCategory, query: &str, context: &AgentContext) -> Option<String> {
        self.get_spec(category)
            .map(|spec| render_prompt(spec, query, context))
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The query is inserted verbatim, never interpreted as a template.
pub fn render_prompt(spec: &AgentSpec, query: &str, context: &AgentContext) -> String {
    let mut instructions: Vec<String> = spec.instructions.iter().map(|i| format!("- {}", i)).collect();
    instructions.push(format!("- Keep response under {} words", spec.word_limit));

    format!(
        "{persona}\n\n\
         USER PROFILE: {profile}\n\
         USER SYMPTOMS: {history}\n\
         CONVERSATION HISTORY: {conversation}\n\n\
         USER'S QUESTION: \"{query}\"\n\n\
         {heading}:\n\
         {instructions}\n\n\
         {cue}",
        persona = spec.persona,
        profile = context.profile_text,
        history = context.history_text,
        conversation = context.conversation_text,
        query = query.trim(),
        heading = spec.instructions_heading,
        instructions = instructions.join("\n"),
        cue = spec.response_cue,
    )
}
