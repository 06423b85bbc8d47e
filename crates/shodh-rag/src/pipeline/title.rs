//! Title-quality heuristics (spec §11), ported from
//! `original_source/backend/app/services/background.py`'s
//! `_should_generate_title` and the inline title-validation checks in
//! `process_document_task`.

use std::sync::LazyLock;

use regex::Regex;

const MIN_TITLE_LEN: usize = 3;
const MAX_TITLE_LEN: usize = 100;

/// Accepted length range for an LLM-generated title candidate (spec §4.10
/// step 2: "accept only if length ∈ [4, 80]").
const MIN_GENERATED_TITLE_LEN: usize = 4;
const MAX_GENERATED_TITLE_LEN: usize = 80;

static HEX_OR_UUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F-]{8,}$").expect("valid regex"));
static TIMESTAMP_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}[-_]\d{2}[-_]\d{2}").expect("valid regex"));
static SCREENSHOT_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(screenshot|screen[ _-]?recording|image|img|scan)[\s_-]*\d*$").expect("valid regex")
});
static GARBAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(untitled|document|copy of|temp|draft|new document|unnamed)\b").expect("valid regex")
});
static LEADING_PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\w\p{Han}]").expect("valid regex"));
static HAS_LETTER_OR_CJK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{Han}]").expect("valid regex"));

/// True when `title` (the document's current, non-generated title) looks
/// low-quality enough that an LLM-generated replacement should be
/// preferred (spec §11).
pub fn should_generate_title(title: &str, filename: &str) -> bool {
    let trimmed = title.trim();

    if trimmed.is_empty() {
        return true;
    }
    if trimmed.chars().count() < MIN_TITLE_LEN || trimmed.chars().count() > MAX_TITLE_LEN {
        return true;
    }

    let filename_stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
    if trimmed.eq_ignore_ascii_case(filename_stem) {
        return true;
    }

    if HEX_OR_UUID.is_match(trimmed) {
        return true;
    }
    if TIMESTAMP_LIKE.is_match(trimmed) {
        return true;
    }
    if SCREENSHOT_LIKE.is_match(trimmed) {
        return true;
    }
    if GARBAGE_PATTERN.is_match(trimmed) {
        return true;
    }

    let alnum_count = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    let total = trimmed.chars().count().max(1);
    if (alnum_count as f32 / total as f32) < 0.4 {
        return true;
    }

    false
}

/// Plausibility gate on an LLM-generated title candidate before it's
/// allowed to replace anything (spec §11): long enough, doesn't start with
/// punctuation or filler words, isn't mostly whitespace, and contains an
/// actual letter.
pub fn is_title_plausible(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    let len = trimmed.chars().count();

    if len < MIN_GENERATED_TITLE_LEN || len > MAX_GENERATED_TITLE_LEN {
        return false;
    }
    if LEADING_PUNCTUATION.is_match(trimmed) {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("including") || lower.starts_with("and ") {
        return false;
    }
    let space_count = trimmed.chars().filter(|c| *c == ' ').count();
    if space_count >= len / 2 {
        return false;
    }
    if !HAS_LETTER_OR_CJK.is_match(trimmed) {
        return false;
    }

    true
}

/// Count of alphanumeric/CJK characters, used to compare an original title
/// against a generated candidate's "information richness" (spec §11).
pub fn meaningful_char_count(title: &str) -> usize {
    title.chars().filter(|c| c.is_alphanumeric()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_title_needs_generation() {
        assert!(should_generate_title("", "report.pdf"));
    }

    #[test]
    fn title_matching_filename_stem_needs_generation() {
        assert!(should_generate_title("report", "report.pdf"));
    }

    #[test]
    fn uuid_like_title_needs_generation() {
        assert!(should_generate_title("3f9a2b1c-44de-4a11-9c10-abc123456789", "scan.pdf"));
    }

    #[test]
    fn screenshot_like_title_needs_generation() {
        assert!(should_generate_title("Screenshot 2024-01-01", "img.png"));
    }

    #[test]
    fn descriptive_title_does_not_need_generation() {
        assert!(!should_generate_title("Quarterly Security Review", "report.pdf"));
    }

    #[test]
    fn implausible_candidate_titles_are_rejected() {
        assert!(!is_title_plausible("Hi"));
        assert!(!is_title_plausible(", a title"));
        assert!(!is_title_plausible("Including some stuff"));
        assert!(!is_title_plausible("a b c d e f"));
        assert!(!is_title_plausible("12345"));
    }

    #[test]
    fn plausible_candidate_title_is_accepted() {
        assert!(is_title_plausible("Distributed Consensus Algorithms"));
    }

    #[test]
    fn candidate_title_over_max_length_is_rejected() {
        let long = "word ".repeat(20);
        assert!(long.chars().count() > MAX_GENERATED_TITLE_LEN);
        assert!(!is_title_plausible(&long));
    }
}
