//! Clarification Engine (spec §4.8): uncertainty detection and question
//! extraction over a completed LLM response.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hedging phrases, English plus the Czech set the spec's worked example
/// needs (spec §9 Open Question 2: normative in meaning, not exact regex).
static HEDGING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(not sure|unclear|ambiguous|could be|might be|possibly|probably|není jasné|nejisté|možná)\b",
    )
    .unwrap()
});

static MULTI_QUESTION_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?{2,}").unwrap());

static WHICH_OF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwhich of\b").unwrap());

/// `<!-- QUESTION?: "..." -->` marker comments.
static MARKER_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<!--\s*QUESTION\?:\s*"(?P<q>[^"]*)"\s*-->"#).unwrap());

/// Inline marker form `QUESTION?: "..."` without the HTML comment wrapper.
static MARKER_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"QUESTION\?:\s*"(?P<q>[^"]*)""#).unwrap());

/// Whether `text` trips any of the four uncertainty classes from spec §4.8.
pub fn needs_clarification(text: &str) -> bool {
    HEDGING.is_match(text)
        || MULTI_QUESTION_MARK.is_match(text)
        || WHICH_OF.is_match(text)
        || MARKER_COMMENT.is_match(text)
        || MARKER_INLINE.is_match(text)
}

/// Extracts clarification questions from `text`, in order: explicit marker
/// questions first (comment form, then inline form), then plain lines
/// ending in `?` of length > 10 not already captured and not inside marker
/// syntax. Deduplicates preserving first-seen order (spec §4.8).
pub fn extract_questions(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for cap in MARKER_COMMENT.captures_iter(text) {
        let q = cap["q"].trim().to_string();
        if !q.is_empty() && seen.insert(q.clone()) {
            out.push(q);
        }
    }

    let marker_spans: Vec<(usize, usize)> = MARKER_COMMENT
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .chain(MARKER_INLINE.find_iter(text).map(|m| (m.start(), m.end())))
        .collect();

    for cap in MARKER_INLINE.captures_iter(text) {
        let q = cap["q"].trim().to_string();
        if !q.is_empty() && seen.insert(q.clone()) {
            out.push(q);
        }
    }

    let mut offset = 0usize;
    for line in text.lines() {
        let line_start = offset;
        let line_end = offset + line.len();
        offset = line_end + 1; // account for the '\n' split away by .lines()

        let trimmed = line.trim();
        let inside_marker = marker_spans
            .iter()
            .any(|(s, e)| line_start >= *s && line_end <= *e);

        if !inside_marker && trimmed.ends_with('?') && trimmed.len() > 10 {
            let q = trimmed.to_string();
            if seen.insert(q.clone()) {
                out.push(q);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn czech_hedge_with_double_question_mark_triggers_and_extracts() {
        let text = "Není jasné, která hodnota platí? 150000 nebo 152000?";
        assert!(needs_clarification(text));
        let qs = extract_questions(text);
        assert_eq!(qs, vec![text.to_string()]);
    }

    #[test]
    fn marker_comment_is_extracted_and_deduplicated() {
        let text = r#"Some text. <!-- QUESTION?: "Which column is correct?" --> more text."#;
        assert!(needs_clarification(text));
        let qs = extract_questions(text);
        assert_eq!(qs, vec!["Which column is correct?".to_string()]);
    }

    #[test]
    fn short_question_lines_are_ignored() {
        let text = "Ok?\nSummary complete.";
        assert!(extract_questions(text).is_empty());
    }

    #[test]
    fn which_of_construction_triggers_detection() {
        assert!(needs_clarification("Which of these totals should I use?"));
    }

    #[test]
    fn plain_text_needs_no_clarification() {
        assert!(!needs_clarification("The total is 42. All clear."));
    }
}
