//! Identity normalization and string similarity

use regex::Regex;
use std::sync::LazyLock;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("Invalid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex"));

/// Minimum brand similarity for a fuzzy candidate to be scored at all
pub const BRAND_GATE: u8 = 70;
/// Minimum weighted score for a fuzzy candidate to be suggested
pub const ACCEPT_SCORE: u8 = 50;

const BRAND_WEIGHT: f64 = 0.4;
const MODEL_WEIGHT: f64 = 0.6;

/// Lowercase, drop punctuation, collapse whitespace
pub fn normalize(value: &str) -> String {
    let lowered = value.to_lowercase();
    let stripped = NON_ALPHANUMERIC.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Levenshtein similarity in percent: `round((1 - d / max_len) * 100)`
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn similarity(a: &str, b: &str) -> u8 {
    if a == b {
        return 100;
    }
    let max_len = a.chars().count().max(b.chars().count());
    let distance = strsim::levenshtein(a, b);
    ((1.0 - distance as f64 / max_len as f64) * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Weighted fuzzy score, or `None` when the brand gate or acceptance threshold rejects it
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fuzzy_score(brand_similarity: u8, model_similarity: u8) -> Option<u8> {
    if brand_similarity < BRAND_GATE {
        return None;
    }
    let score = BRAND_WEIGHT.mul_add(
        f64::from(brand_similarity),
        MODEL_WEIGHT * f64::from(model_similarity),
    );
    let score = score.round().clamp(0.0, 100.0) as u8;
    (score >= ACCEPT_SCORE).then_some(score)
}

/// Brand equality or substring containment in either direction.
/// A missing brand is compatible with nothing, including another missing one.
pub fn brands_compatible(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(b) || b.contains(a)
}
