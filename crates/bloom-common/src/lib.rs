use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The specialist that should answer a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryCategory {
    Consultation,
    Exercise,
    Diet,
    BasicQuery,
}

impl QueryCategory {
    /// All categories, in the order used to break routing ties.
    pub const ALL: [QueryCategory; 4] = [
        QueryCategory::Consultation,
        QueryCategory::Exercise,
        QueryCategory::Diet,
        QueryCategory::BasicQuery,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            QueryCategory::Consultation => "CONSULTATION",
            QueryCategory::Exercise => "EXERCISE",
            QueryCategory::Diet => "DIET",
            QueryCategory::BasicQuery => "BASIC_QUERY",
        }
    }

    /// Parse a category label as written by a person or a model.
    ///
    /// Accepts `BASIC_QUERY`, `basic query`, `Basic-Query` and the aliases
    /// `BASIC` / `GENERAL`.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        match normalized.as_str() {
            "CONSULTATION" => Some(QueryCategory::Consultation),
            "EXERCISE" => Some(QueryCategory::Exercise),
            "DIET" => Some(QueryCategory::Diet),
            "BASIC_QUERY" | "BASIC" | "GENERAL" => Some(QueryCategory::BasicQuery),
            _ => None,
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Personal details a user shares so answers can be tailored.
///
/// Known fields are typed; anything else the client sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menopause_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_symptoms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_medications: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_treatments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exercise_preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dietary_preferences: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UserProfile {
    pub fn is_empty(&self) -> bool {
        self.age.is_none()
            && self.menopause_stage.is_none()
            && self.current_symptoms.is_empty()
            && self.health_conditions.is_empty()
            && self.current_medications.is_empty()
            && self.previous_treatments.is_empty()
            && self.fitness_level.is_none()
            && self.exercise_preferences.is_empty()
            && self.dietary_preferences.is_empty()
            && self.extra.is_empty()
    }

    /// Render the profile as `key: value` pairs for a prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut parts = Vec::new();

        if let Some(age) = self.age {
            parts.push(format!("age: {}", age));
        }
        push_text(&mut parts, "menopause_stage", self.menopause_stage.as_deref());
        push_list(&mut parts, "current_symptoms", &self.current_symptoms);
        push_list(&mut parts, "health_conditions", &self.health_conditions);
        push_list(&mut parts, "current_medications", &self.current_medications);
        push_list(&mut parts, "previous_treatments", &self.previous_treatments);
        push_text(&mut parts, "fitness_level", self.fitness_level.as_deref());
        push_list(&mut parts, "exercise_preferences", &self.exercise_preferences);
        push_list(&mut parts, "dietary_preferences", &self.dietary_preferences);

        for (key, value) in &self.extra {
            let rendered = render_json(value);
            if !rendered.is_empty() {
                parts.push(format!("{}: {}", key, rendered));
            }
        }

        parts.join("; ")
    }
}

fn push_text(parts: &mut Vec<String>, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        parts.push(format!("{}: {}", key, v));
    }
}

fn push_list(parts: &mut Vec<String>, key: &str, values: &[String]) {
    let items: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if !items.is_empty() {
        parts.push(format!("{}: {}", key, items.join(", ")));
    }
}

fn render_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(render_json)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// One answered question, kept as user history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: uuid::Uuid,
    pub user_id: String,
    pub query: String,
    pub response: String,
    pub category: QueryCategory,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<String>,
        query: impl Into<String>,
        response: impl Into<String>,
        category: QueryCategory,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id: user_id.into(),
            query: query.into(),
            response: response.into(),
            category,
            timestamp: Utc::now(),
        }
    }
}

/// Common error types
#[derive(thiserror::Error, Debug)]
pub enum BloomError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM API error: {0}")]
    Llm(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BloomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_variants() {
        assert_eq!(
            QueryCategory::parse_label("basic query"),
            Some(QueryCategory::BasicQuery)
        );
        assert_eq!(
            QueryCategory::parse_label(" Exercise "),
            Some(QueryCategory::Exercise)
        );
        assert_eq!(
            QueryCategory::parse_label("GENERAL"),
            Some(QueryCategory::BasicQuery)
        );
        assert_eq!(QueryCategory::parse_label("sleep"), None);
    }

    #[test]
    fn test_category_serializes_as_label() {
        let json = serde_json::to_string(&QueryCategory::BasicQuery).unwrap();
        assert_eq!(json, "\"BASIC_QUERY\"");
        assert_eq!(QueryCategory::Diet.to_string(), "DIET");
    }

    #[test]
    fn test_profile_prompt_text() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "age": 52,
            "menopause_stage": "perimenopause",
            "current_symptoms": ["hot flashes", "night sweats"],
            "sleep_hours": 6,
            "notes": ""
        }))
        .unwrap();

        assert!(!profile.is_empty());
        assert_eq!(
            profile.to_prompt_text(),
            "age: 52; menopause_stage: perimenopause; current_symptoms: hot flashes, night sweats; sleep_hours: 6"
        );
    }

    #[test]
    fn test_empty_profile() {
        let profile = UserProfile::default();
        assert!(profile.is_empty());
        assert_eq!(profile.to_prompt_text(), "");
    }
}
