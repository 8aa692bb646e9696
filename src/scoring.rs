//! Result scoring heuristics.
//!
//! Engines use [`initial_relevance`] to score raw hits (rank decay, keyword
//! overlap, domain trust); the shared retriever pipeline uses
//! [`blended_quality`] to filter and order results before they leave the
//! retrieval layer. All scores are clamped to `[0.0, 1.0]`.

use crate::models::RetrievedItem;

/// Domains whose results are trusted at full weight.
const TRUSTED_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "bbc.com",
    "reuters.com",
    "nature.com",
    "sciencedirect.com",
    "github.com",
    "stackoverflow.com",
    "arxiv.org",
];

/// Phrases that mark a result as promotional noise.
const SPAM_MARKERS: &[&str] = &[
    "click here",
    "buy now",
    "limited time",
    "free download",
    "best price",
];

/// Trust weight for a URL's domain.
pub fn domain_trust(url: &str) -> f64 {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    if host.is_empty() {
        return 0.4;
    }
    if TRUSTED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    {
        return 1.0;
    }
    if host.ends_with(".gov") || host.ends_with(".edu") || host.ends_with(".org") {
        return 0.8;
    }
    if host.ends_with(".com") || host.ends_with(".net") {
        return 0.6;
    }
    0.4
}

/// Fraction of query terms that appear in `text` (case-insensitive).
pub fn keyword_overlap(text: &str, terms: &[&str]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_ascii_lowercase();
    let hits = terms
        .iter()
        .filter(|t| !t.is_empty() && haystack.contains(&t.to_ascii_lowercase()))
        .count();
    hits as f64 / terms.len() as f64
}

/// Initial relevance estimate for a raw search hit.
///
/// Blends rank decay (0.4), title overlap (0.3), snippet overlap (0.2),
/// and domain trust (0.1). `rank` is zero-based position in the engine's
/// result order.
pub fn initial_relevance(rank: usize, title: &str, snippet: &str, url: &str, query: &str) -> f64 {
    let terms: Vec<&str> = query.split_whitespace().collect();

    let rank_score = if rank >= 10 {
        0.0
    } else {
        (10 - rank) as f64 / 10.0
    };

    let score = rank_score * 0.4
        + keyword_overlap(title, &terms) * 0.3
        + keyword_overlap(snippet, &terms) * 0.2
        + domain_trust(url) * 0.1;

    score.clamp(0.0, 1.0)
}

/// Standalone quality estimate from the item's surface features.
fn quality(item: &RetrievedItem) -> f64 {
    let mut score: f64 = 0.5;

    let title_len = item.title.trim().chars().count();
    if title_len >= 20 {
        score += 0.1;
    } else if title_len < 5 {
        score -= 0.2;
    }

    let snippet_len = item.snippet.trim().chars().count();
    if snippet_len >= 80 {
        score += 0.15;
    } else if snippet_len == 0 {
        score -= 0.2;
    }

    let lowered = format!("{} {}", item.title, item.snippet).to_ascii_lowercase();
    if SPAM_MARKERS.iter().any(|m| lowered.contains(m)) {
        score -= 0.3;
    }

    score += (domain_trust(&item.url) - 0.5) * 0.2;

    score.clamp(0.0, 1.0)
}

/// Final filtering score: surface quality blended with the engine's own
/// relevance estimate.
pub fn blended_quality(item: &RetrievedItem) -> f64 {
    (quality(item) * 0.6 + item.relevance_score * 0.4).clamp(0.0, 1.0)
}
