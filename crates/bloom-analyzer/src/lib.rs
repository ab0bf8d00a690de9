use bloom_common::QueryCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Vocabulary that signals one category.
struct CategoryVocabulary {
    category: QueryCategory,
    /// Matched against whole tokens, also with a plural or verb suffix.
    words: &'static [&'static str],
    /// Matched as substrings of the normalized query, at a word start.
    phrases: &'static [&'static str],
    phrase_weight: usize,
}

const SUFFIXES: [&str; 4] = ["s", "es", "ing", "ed"];

const VOCABULARY: [CategoryVocabulary; 4] = [
    CategoryVocabulary {
        category: QueryCategory::Consultation,
        words: &[
            "symptom", "sweat", "mood", "anxiety", "anxious", "depression", "depressed",
            "irritable", "insomnia", "sleep", "sleepless", "tired", "fatigue", "headache",
            "migraine", "pain", "ache", "joint", "period", "bleeding", "spotting", "hormone",
            "hormonal", "hrt", "estrogen", "oestrogen", "progesterone", "libido", "dryness",
            "itchy", "palpitation", "forgetful", "feel", "feeling", "experiencing", "worried",
            "worry", "treatment", "remedy", "remedies", "relief", "cope", "coping",
        ],
        phrases: &[
            "hot flash", "hot flush", "night sweat", "mood swing", "brain fog",
            "hormone therapy", "vaginal dryness", "can't sleep", "cant sleep",
        ],
        phrase_weight: 2,
    },
    CategoryVocabulary {
        category: QueryCategory::Exercise,
        words: &[
            "exercise", "workout", "yoga", "pilates", "walk", "run", "jog", "swim", "swimming",
            "strength", "cardio", "stretch", "fitness", "train", "training", "gym", "lift",
            "lifting", "aerobic", "hiit", "activity", "movement", "muscle", "resistance",
            "dance", "dancing", "cycling", "bike", "steps", "squat", "plank",
        ],
        phrases: &[
            "weight training", "strength training", "physical activity", "bone density",
            "pelvic floor", "work out",
        ],
        phrase_weight: 2,
    },
    CategoryVocabulary {
        category: QueryCategory::Diet,
        words: &[
            "diet", "food", "eat", "meal", "nutrition", "nutrient", "calcium", "vitamin",
            "protein", "fiber", "fibre", "recipe", "snack", "breakfast", "lunch", "dinner",
            "drink", "caffeine", "coffee", "alcohol", "sugar", "soy", "fruit", "vegetable",
            "supplement", "calorie", "hydration", "water", "phytoestrogen", "omega", "dairy",
        ],
        phrases: &[
            "weight gain", "lose weight", "weight loss", "belly fat", "flax seed", "flaxseed",
        ],
        phrase_weight: 2,
    },
    CategoryVocabulary {
        category: QueryCategory::BasicQuery,
        words: &["define", "definition", "stage", "explain", "perimenopause", "postmenopause"],
        phrases: &[
            "what is", "what are", "what does", "meaning of", "how long", "at what age",
            "difference between", "tell me about",
        ],
        phrase_weight: 1,
    },
];

const STOP_WORDS: [&str; 52] = [
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "do", "does", "did", "will", "would", "should", "could", "may", "might", "must",
    "can", "to", "from", "in", "on", "at", "by", "for", "with", "about", "as", "of", "and",
    "or", "but", "not", "this", "that", "these", "those", "i", "you", "me", "my", "your",
    "what", "how", "why", "any",
];

/// Keyword analyzer for incoming wellness questions.
pub struct QueryAnalyzer {
    stop_words: HashSet<&'static str>,
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().copied().collect(),
        }
    }

    /// Analyze a query and score it against every category vocabulary.
    pub fn analyze(&self, query: &str) -> AnalyzedQuery {
        let normalized = normalize(query);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        let keywords = self.extract_keywords(&tokens);
        let scores = score_categories(&normalized, &tokens);

        debug!("Keyword scores for '{}': {:?}", normalized, scores);

        AnalyzedQuery {
            original: query.to_string(),
            normalized,
            keywords,
            scores,
        }
    }

    fn extract_keywords(&self, tokens: &[&str]) -> Vec<String> {
        let mut seen = HashSet::new();
        tokens
            .iter()
            .filter(|word| !self.stop_words.contains(*word) && word.len() > 2)
            .filter(|word| seen.insert(**word))
            .map(|word| word.to_string())
            .collect()
    }
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, replace punctuation with spaces (apostrophes survive) and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let replaced: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn word_matches(token: &str, word: &str) -> bool {
    match token.strip_prefix(word) {
        Some("") => true,
        Some(rest) => SUFFIXES.contains(&rest),
        None => false,
    }
}

fn score_categories(normalized: &str, tokens: &[&str]) -> Vec<CategoryScore> {
    let padded = format!(" {}", normalized);

    VOCABULARY
        .iter()
        .map(|vocab| {
            let word_hits = vocab
                .words
                .iter()
                .filter(|word| tokens.iter().any(|t| word_matches(t, word)))
                .count();
            let phrase_hits = vocab
                .phrases
                .iter()
                .filter(|phrase| padded.contains(&format!(" {}", phrase)))
                .count();

            CategoryScore {
                category: vocab.category,
                score: word_hits + phrase_hits * vocab.phrase_weight,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: QueryCategory,
    pub score: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedQuery {
    pub original: String,
    pub normalized: String,
    pub keywords: Vec<String>,
    /// One entry per category, in `QueryCategory::ALL` order.
    pub scores: Vec<CategoryScore>,
}

impl AnalyzedQuery {
    pub fn score(&self, category: QueryCategory) -> usize {
        self.scores
            .iter()
            .find(|s| s.category == category)
            .map(|s| s.score)
            .unwrap_or(0)
    }

    /// Highest-scoring category; earlier categories win ties. `None` if nothing matched.
    pub fn best_category(&self) -> Option<(QueryCategory, usize)> {
        let mut best: Option<(QueryCategory, usize)> = None;
        for category in QueryCategory::ALL {
            let score = self.score(category);
            if score > 0 && best.map_or(true, |(_, top)| score > top) {
                best = Some((category, score));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn best(query: &str) -> Option<QueryCategory> {
        QueryAnalyzer::new().analyze(query).best_category().map(|(c, _)| c)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hot-flashes?!  At NIGHT "), "hot flashes at night");
        assert_eq!(normalize("I can't sleep"), "i can't sleep");
    }

    #[test]
    fn test_extract_keywords() {
        let analyzed = QueryAnalyzer::new().analyze("What exercises help with bone density and bone pain?");

        assert!(analyzed.keywords.contains(&"exercises".to_string()));
        assert!(analyzed.keywords.contains(&"bone".to_string()));
        assert!(!analyzed.keywords.contains(&"with".to_string()));
        assert_eq!(analyzed.keywords.iter().filter(|k| *k == "bone").count(), 1);
    }

    #[test]
    fn test_routes_symptom_questions_to_consultation() {
        assert_eq!(
            best("I am experiencing hot flashes and night sweats. What can I do?"),
            Some(QueryCategory::Consultation)
        );
        assert_eq!(best("My mood swings are getting worse"), Some(QueryCategory::Consultation));
    }

    #[test]
    fn test_routes_exercise_questions() {
        assert_eq!(
            best("I want to start strength training but I have never done it before"),
            Some(QueryCategory::Exercise)
        );
        assert_eq!(best("What are good exercises for menopause?"), Some(QueryCategory::Exercise));
    }

    #[test]
    fn test_routes_diet_questions() {
        assert_eq!(
            best("Which foods are rich in calcium?"),
            Some(QueryCategory::Diet)
        );
        assert_eq!(best("How do I lose weight after 50"), Some(QueryCategory::Diet));
    }

    #[test]
    fn test_routes_definitions_to_basic_query() {
        assert_eq!(best("What are the stages of menopause?"), Some(QueryCategory::BasicQuery));
        assert_eq!(best("What is menopause?"), Some(QueryCategory::BasicQuery));
    }

    #[test]
    fn test_no_signal() {
        let analyzed = QueryAnalyzer::new().analyze("hello there");
        assert_eq!(analyzed.best_category(), None);
        assert_eq!(analyzed.scores.len(), 4);
    }

    #[test]
    fn test_suffix_matching_is_strict() {
        assert!(word_matches("walking", "walk"));
        assert!(word_matches("flashes", "flashes"));
        assert!(word_matches("symptoms", "symptom"));
        assert!(!word_matches("painful", "pain"));
        assert!(!word_matches("eaten", "eat"));
    }
}
