use crate::AgentSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Answers shorter than this get the agent's follow-up question appended.
pub const SHORT_RESPONSE_CHARS: usize = 30;

static SPEAKER_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*(?:bloom|assistant|answer|response)\s*:\s*["']?"#)
        .expect("Should compile: SPEAKER_PREFIX_RE")
});
static TRAILING_QUOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']\s*$"#).expect("Should compile: TRAILING_QUOTE_RE"));
static LEADING_QUOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*["']"#).expect("Should compile: LEADING_QUOTE_RE"));
static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#{1,6}\s*").expect("Should compile: HEADER_RE"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+").expect("Should compile: BULLET_RE")
});
static EMPHASIS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*|__|`+|\*").expect("Should compile: EMPHASIS_RE"));
/// A sentence ends at a run of terminators followed by whitespace, or at the end of the text.
static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s).+?(?:[.!?]+(?:\s+|$)|$)").expect("Should compile: SENTENCE_RE")
});
static DISCLAIMER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bconsult\w*\b.*\b(?:doctor|physician|provider|professional|gp|gynecologist|specialist)|\bseek\w*\b.*\bmedical\b.*\b(?:advice|attention|help|care)|\bhealth\s*care provider|\bmedical professional|\bnot a substitute for\b|\b(?:talk|speak)\w* (?:to|with) (?:your|a) (?:doctor|physician|gp)",
    )
    .expect("Should compile: DISCLAIMER_RE")
});
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Should compile: WHITESPACE_RE"));
static PERIOD_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.{2,}").expect("Should compile: PERIOD_RUN_RE"));
static SPACE_BEFORE_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([.,!?;:])").expect("Should compile: SPACE_BEFORE_PUNCT_RE"));

/// Turns a raw completion into the text returned to the user.
#[derive(Debug, Clone, Default)]
pub struct ResponseCleaner;

impl ResponseCleaner {
    pub fn new() -> Self {
        Self
    }

    pub fn clean(&self, raw: &str, spec: &AgentSpec) -> String {
        // The label goes first so a stop sequence like "Assistant:" cannot cut the whole answer.
        let mut text = strip_speaker_label(raw);
        text = cut_at_stop_sequence(&text, &spec.params.stop_sequences);
        text = strip_speaker_label(&text);

        if spec.cleanup.strip_markdown {
            text = strip_markdown(&text);
        }
        if spec.cleanup.strip_disclaimers {
            text = strip_disclaimers(&text);
        }

        text = normalize_spacing(&text);
        text = enforce_word_limit(&text, spec.word_limit);

        if text.is_empty() {
            debug!("Cleaned response was empty, using fallback for {}", spec.category);
            return spec.fallback_message.clone();
        }

        add_follow_up(text, &spec.follow_up)
    }
}

fn ends_sentence(text: &str) -> bool {
    text.ends_with(['.', '!', '?'])
}

/// Cut at the earliest stop sequence the model echoed, then drop the dangling fragment.
pub fn cut_at_stop_sequence(raw: &str, stops: &[String]) -> String {
    let cut = stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| raw.find(s.as_str()))
        .min();

    let Some(pos) = cut else {
        return raw.trim().to_string();
    };

    let head = raw[..pos].trim_end();
    if ends_sentence(head) {
        return head.trim().to_string();
    }
    match head.rfind(['.', '!', '?']) {
        Some(end) => head[..=end].trim().to_string(),
        None => head.trim().to_string(),
    }
}

/// Remove a leading `Bloom:`-style label and wrapping quotes.
pub fn strip_speaker_label(text: &str) -> String {
    let without_label = SPEAKER_PREFIX_RE.replace(text.trim(), "");
    let without_open = LEADING_QUOTE_RE.replace(&without_label, "");
    TRAILING_QUOTE_RE.replace(&without_open, "").trim().to_string()
}

/// Flatten markdown into plain sentences. Bullet items become sentences.
pub fn strip_markdown(text: &str) -> String {
    let mut out = Vec::new();

    for line in text.lines() {
        let without_header = HEADER_RE.replace(line, "");
        let is_bullet = BULLET_RE.is_match(&without_header);
        let without_bullet = BULLET_RE.replace(&without_header, "");
        let plain = EMPHASIS_RE.replace_all(&without_bullet, "");
        let mut plain = plain.trim().to_string();

        if plain.is_empty() {
            continue;
        }
        if is_bullet && !plain.ends_with(['.', '!', '?', ':', ';']) {
            plain.push('.');
        }
        out.push(plain);
    }

    out.join(" ")
}

/// Drop every sentence that reads as a referral or medical disclaimer.
pub fn strip_disclaimers(text: &str) -> String {
    SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|sentence| !sentence.is_empty() && !DISCLAIMER_RE.is_match(sentence))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_spacing(text: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(text, " ");
    let tidy = SPACE_BEFORE_PUNCT_RE.replace_all(&collapsed, "$1");
    let periods = PERIOD_RUN_RE.replace_all(&tidy, ".");
    let trimmed = periods.trim();

    if trimmed.chars().all(|c| !c.is_alphanumeric()) {
        return String::new();
    }
    trimmed.to_string()
}

/// Keep at most `limit` words, preferring to end on a sentence boundary.
pub fn enforce_word_limit(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if limit == 0 || words.len() <= limit {
        return text.to_string();
    }

    let kept = &words[..limit];
    let half = limit / 2;
    let last_sentence_end = kept
        .iter()
        .rposition(|w| ends_sentence(w))
        .filter(|&idx| idx + 1 >= half.max(1));

    match last_sentence_end {
        Some(idx) => kept[..=idx].join(" "),
        None => {
            let mut truncated = kept.join(" ");
            let trimmed_len = truncated.trim_end_matches([',', ';', ':', '-']).len();
            truncated.truncate(trimmed_len);
            if !ends_sentence(&truncated) {
                truncated.push('.');
            }
            truncated
        }
    }
}

/// Short answers that are not questions get a follow-up question.
pub fn add_follow_up(mut text: String, follow_up: &str) -> String {
    if follow_up.is_empty() || text.chars().count() >= SHORT_RESPONSE_CHARS || text.ends_with('?') {
        return text;
    }

    if ends_sentence(&text) {
        text.push(' ');
    } else {
        text.push_str(". ");
    }
    text.push_str(follow_up);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PromptRegistry;
    use bloom_common::QueryCategory;

    fn spec(category: QueryCategory) -> AgentSpec {
        PromptRegistry::new().get_spec(category).unwrap().clone()
    }

    #[test]
    fn test_strips_speaker_label_and_quotes() {
        assert_eq!(
            strip_speaker_label("Bloom: \"Try cooling your bedroom at night.\""),
            "Try cooling your bedroom at night."
        );
        assert_eq!(strip_speaker_label("bloom:Rest well."), "Rest well.");
    }

    #[test]
    fn test_cut_at_stop_sequence_drops_fragment() {
        let stops = vec!["doctor".to_string(), "User:".to_string()];
        assert_eq!(
            cut_at_stop_sequence("Layer your clothing. You may want to see a doctor soon.", &stops),
            "Layer your clothing."
        );
        assert_eq!(
            cut_at_stop_sequence("Drink water.\nUser: thanks", &stops),
            "Drink water."
        );
        assert_eq!(cut_at_stop_sequence("  Plain answer. ", &stops), "Plain answer.");
    }

    #[test]
    fn test_strip_disclaimers_drops_whole_sentences() {
        let text = "Black cohosh may ease hot flashes. Please consult your healthcare provider before starting anything. Keep a symptom diary!";
        assert_eq!(
            strip_disclaimers(text),
            "Black cohosh may ease hot flashes. Keep a symptom diary!"
        );
        assert_eq!(
            strip_disclaimers("This is not a substitute for medical advice. Sleep in a cool room."),
            "Sleep in a cool room."
        );
    }

    #[test]
    fn test_strip_disclaimers_keeps_decimals_and_abbreviations() {
        let text = "Aim for 1.5 liters of water daily, e.g. herbal teas. Please consult your doctor first.";
        assert_eq!(
            strip_disclaimers(text),
            "Aim for 1.5 liters of water daily, e.g. herbal teas."
        );
        assert_eq!(strip_disclaimers("Take 2.5 mg. Rest well"), "Take 2.5 mg. Rest well");
    }

    #[test]
    fn test_strip_markdown_turns_bullets_into_sentences() {
        let text = "## Plan\n- **Walk** 30 minutes\n- Try `yoga`\n1. Lift light weights.";
        assert_eq!(
            strip_markdown(text),
            "Plan Walk 30 minutes. Try yoga. Lift light weights."
        );
    }

    #[test]
    fn test_normalize_spacing() {
        assert_eq!(normalize_spacing("Rest   well..  Drink water ."), "Rest well. Drink water.");
        assert_eq!(normalize_spacing(" . . "), "");
    }

    #[test]
    fn test_word_limit_prefers_sentence_boundary() {
        let text = "One two three. Four five six seven eight nine ten";
        assert_eq!(enforce_word_limit(text, 6), "One two three.");
        assert_eq!(enforce_word_limit("a b c d e f g h", 4), "a b c d.");
        assert_eq!(enforce_word_limit("a b,", 4), "a b,");
        assert_eq!(enforce_word_limit("one two, three four", 2), "one two.");
    }

    #[test]
    fn test_follow_up_only_for_short_statements() {
        assert_eq!(add_follow_up("Try yoga".to_string(), "Anything else?"), "Try yoga. Anything else?");
        assert_eq!(add_follow_up("Try yoga.".to_string(), "Anything else?"), "Try yoga. Anything else?");
        assert_eq!(add_follow_up("Is it sleep?".to_string(), "Anything else?"), "Is it sleep?");
        let long = "Strength training twice a week protects your bones.".to_string();
        assert_eq!(add_follow_up(long.clone(), "Anything else?"), long);
    }

    #[test]
    fn test_clean_consultation_pipeline() {
        let cleaner = ResponseCleaner::new();
        let raw = "Bloom: \"Hot flashes are common in perimenopause. Dress in layers and keep a fan nearby.. Seek medical advice if they persist.\"";
        assert_eq!(
            cleaner.clean(raw, &spec(QueryCategory::Consultation)),
            "Hot flashes are common in perimenopause. Dress in layers and keep a fan nearby."
        );
    }

    #[test]
    fn test_clean_keeps_decimals_in_consultation() {
        let cleaner = ResponseCleaner::new();
        let raw = "Aim for 1.5 liters of water daily, e.g. herbal teas or infused water.";
        assert_eq!(cleaner.clean(raw, &spec(QueryCategory::Consultation)), raw);
    }

    #[test]
    fn test_clean_removes_label_that_is_also_a_stop_sequence() {
        let cleaner = ResponseCleaner::new();
        let exercise = spec(QueryCategory::Exercise);
        assert!(exercise.params.stop_sequences.iter().any(|s| s == "ASSISTANT:"));
        assert_eq!(
            cleaner.clean("ASSISTANT: Walking after meals steadies your energy levels.", &exercise),
            "Walking after meals steadies your energy levels."
        );
        assert_eq!(
            cleaner.clean("ASSISTANT: \"Do squats and lunges twice a week.\" Human: thanks", &exercise),
            "Do squats and lunges twice a week."
        );

        let basic = spec(QueryCategory::BasicQuery);
        assert!(basic.params.stop_sequences.iter().any(|s| s == "Assistant:"));
        assert_eq!(
            cleaner.clean("Assistant: Menopause is confirmed after twelve months without a period.", &basic),
            "Menopause is confirmed after twelve months without a period."
        );
    }

    #[test]
    fn test_clean_empty_uses_fallback() {
        let cleaner = ResponseCleaner::new();
        let exercise = spec(QueryCategory::Exercise);
        assert_eq!(cleaner.clean("   ", &exercise), exercise.fallback_message);
        assert_eq!(cleaner.clean("Bloom: \"\"", &exercise), exercise.fallback_message);
    }

    #[test]
    fn test_clean_short_answer_gets_follow_up() {
        let cleaner = ResponseCleaner::new();
        let basic = spec(QueryCategory::BasicQuery);
        assert_eq!(
            cleaner.clean("Around age 51", &basic),
            "Around age 51. What would you like to know more about?"
        );
    }
}
