use anyhow::{Context, Result};
use bloom_analyzer::{AnalyzedQuery, CategoryScore, QueryAnalyzer};
use bloom_common::QueryCategory;
use bloom_llm::{Decoding, GenerationParams, LLMProvider, Message};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

static CATEGORY_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(CONSULTATION|EXERCISE|DIET|BASIC[_ -]?QUERY)\b")
        .expect("Should compile: CATEGORY_LABEL_RE")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    Keyword,
    Llm,
    /// Keywords when they give a clear signal, the model otherwise.
    Hybrid,
}

impl FromStr for RoutingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" | "keywords" => Ok(RoutingStrategy::Keyword),
            "llm" | "model" => Ok(RoutingStrategy::Llm),
            "hybrid" => Ok(RoutingStrategy::Hybrid),
            other => anyhow::bail!("Unknown routing strategy '{}' (expected keyword, llm or hybrid)", other),
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingStrategy::Keyword => f.write_str("keyword"),
            RoutingStrategy::Llm => f.write_str("llm"),
            RoutingStrategy::Hybrid => f.write_str("hybrid"),
        }
    }
}

/// How a routing decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    Keyword,
    Llm,
    /// Nothing matched, or the model answer was unusable.
    Fallback,
    /// The caller picked the agent.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub category: QueryCategory,
    pub method: RoutingMethod,
    pub scores: Vec<CategoryScore>,
}

impl RoutingDecision {
    pub fn direct(category: QueryCategory) -> Self {
        Self {
            category,
            method: RoutingMethod::Direct,
            scores: Vec::new(),
        }
    }
}

/// Decides which specialist answers a query.
pub struct QueryRouter {
    analyzer: QueryAnalyzer,
    llm: Arc<dyn LLMProvider>,
    strategy: RoutingStrategy,
    min_keyword_score: usize,
}

impl QueryRouter {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(),
            llm,
            strategy: RoutingStrategy::Hybrid,
            min_keyword_score: 1,
        }
    }

    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_min_keyword_score(mut self, min_keyword_score: usize) -> Self {
        self.min_keyword_score = min_keyword_score.max(1);
        self
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub async fn route(&self, query: &str) -> RoutingDecision {
        let analyzed = self.analyzer.analyze(query);
        let keyword = keyword_decision(&analyzed);

        let decision = match self.strategy {
            RoutingStrategy::Keyword => keyword,
            RoutingStrategy::Llm => self.llm_decision(query, keyword).await,
            RoutingStrategy::Hybrid => {
                let strong = analyzed
                    .best_category()
                    .is_some_and(|(_, score)| score >= self.min_keyword_score);
                if strong {
                    keyword
                } else {
                    self.llm_decision(query, keyword).await
                }
            }
        };

        info!(
            "Routed query to {} via {:?} ({} strategy)",
            decision.category, decision.method, self.strategy
        );
        decision
    }

    async fn llm_decision(&self, query: &str, keyword: RoutingDecision) -> RoutingDecision {
        match self.classify_with_llm(query).await {
            Ok(Some(category)) => RoutingDecision {
                category,
                method: RoutingMethod::Llm,
                scores: keyword.scores,
            },
            Ok(None) => {
                warn!("Classifier reply had no category label, using keyword decision");
                keyword
            }
            Err(e) => {
                warn!("Classifier call failed, using keyword decision: {:#}", e);
                keyword
            }
        }
    }

    async fn classify_with_llm(&self, query: &str) -> Result<Option<QueryCategory>> {
        let messages = vec![
            Message::system(classification_prompt()),
            Message::user(format!("Question: \"{}\"\nCategory:", query.trim())),
        ];

        let response = self
            .llm
            .generate_with_context(messages, &classification_params())
            .await
            .context("Router LLM call failed")?;

        debug!("Classifier replied: {:?}", response.content);
        Ok(parse_category_reply(&response.content))
    }
}

/// The keyword-only decision. Queries with no signal go to the basic agent.
pub fn keyword_decision(analyzed: &AnalyzedQuery) -> RoutingDecision {
    match analyzed.best_category() {
        Some((category, _)) => RoutingDecision {
            category,
            method: RoutingMethod::Keyword,
            scores: analyzed.scores.clone(),
        },
        None => RoutingDecision {
            category: QueryCategory::BasicQuery,
            method: RoutingMethod::Fallback,
            scores: analyzed.scores.clone(),
        },
    }
}

fn classification_prompt() -> String {
    r#"You are a query classifier for Bloom, a menopause wellness assistant.
Classify the user's question into exactly one category:
- CONSULTATION: symptoms, feelings, treatments, or personal experiences of menopause
- EXERCISE: physical activity, workouts, movement, or fitness
- DIET: food, nutrition, meals, drinks, supplements, or weight through eating
- BASIC_QUERY: general facts, definitions, or anything else

Respond with the category name only."#
        .to_string()
}

fn classification_params() -> GenerationParams {
    GenerationParams {
        decoding: Decoding::Greedy,
        temperature: 0.0,
        min_new_tokens: 1,
        max_new_tokens: 8,
        stop_sequences: vec!["\n".to_string()],
    }
}

/// First category label mentioned in a model reply.
pub fn parse_category_reply(reply: &str) -> Option<QueryCategory> {
    let label = CATEGORY_LABEL_RE.find(reply)?;
    let compact: String = label
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match compact.as_str() {
        "CONSULTATION" => Some(QueryCategory::Consultation),
        "EXERCISE" => Some(QueryCategory::Exercise),
        "DIET" => Some(QueryCategory::Diet),
        "BASICQUERY" => Some(QueryCategory::BasicQuery),
        _ => None,
    }
}
