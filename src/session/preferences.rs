//! Preference inference from query text and tool usage.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{AnalysisStyle, PreferencesUpdate};
use crate::tools::ToolClass;

static DOLLAR_TICKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z]{1,5})\b").expect("dollar ticker regex must compile")
});

static BARE_TICKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{1,5}\b").expect("ticker regex must compile"));

static TECHNICAL_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(technical|indicators?|rsi|macd|moving averages?)\b")
        .expect("technical style regex must compile")
});

static BRIEF_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(brief|briefly|quick|short answer|summari[sz]e)\b|tl;dr")
        .expect("brief style regex must compile")
});

static DETAILED_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(detailed|in-depth|in depth|explain(s|ed|ing)?|deep dive)\b")
        .expect("detailed style regex must compile")
});

/// Upper-case words that look like tickers but almost never are.
const TICKER_STOP_WORDS: &[&str] = &[
    "A", "I", "AI", "AM", "AN", "AND", "API", "ARE", "AT", "CEO", "CFO", "DO", "EMA", "EPS",
    "ETF", "EUR", "FAQ", "FOR", "FX", "GDP", "HOW", "IF", "IN", "IPO", "IS", "IT", "MACD", "ME",
    "MY", "NO", "NOT", "OF", "OK", "ON", "OR", "PE", "PM", "RSI", "SEC", "SMA", "THE", "TO",
    "US", "USA", "USD", "VS", "WHAT", "YTD",
];

/// Extract ticker-like entities in first-seen order.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut entities = Vec::new();
    let mut push = |candidate: String| {
        if seen.insert(candidate.clone()) {
            entities.push(candidate);
        }
    };

    for cap in DOLLAR_TICKER_RE.captures_iter(text) {
        push(cap[1].to_ascii_uppercase());
    }
    for m in BARE_TICKER_RE.find_iter(text) {
        let token = m.as_str();
        if !TICKER_STOP_WORDS.contains(&token) {
            push(token.to_string());
        }
    }
    entities
}

/// Detect an explicitly requested analysis style.
pub fn detect_analysis_style(text: &str) -> Option<AnalysisStyle> {
    if TECHNICAL_STYLE_RE.is_match(text) {
        Some(AnalysisStyle::Technical)
    } else if BRIEF_STYLE_RE.is_match(text) {
        Some(AnalysisStyle::Brief)
    } else if DETAILED_STYLE_RE.is_match(text) {
        Some(AnalysisStyle::Detailed)
    } else {
        None
    }
}

/// Map used tools onto coarse interest categories.
pub fn categories_from_tools<S: AsRef<str>>(tools: &[S]) -> Vec<String> {
    let mut categories = Vec::new();
    for tool in tools {
        let class = ToolClass::of(tool.as_ref());
        if class == ToolClass::Other {
            continue;
        }
        let label = class.to_string();
        if !categories.contains(&label) {
            categories.push(label);
        }
    }
    categories
}

/// Build the preference delta implied by one completed turn.
pub fn infer_preferences<S: AsRef<str>>(query: &str, tools_used: &[S]) -> PreferencesUpdate {
    let entities = extract_entities(query);
    let categories = categories_from_tools(tools_used);
    PreferencesUpdate {
        preferred_entities: (!entities.is_empty()).then_some(entities),
        preferred_categories: (!categories.is_empty()).then_some(categories),
        analysis_style: detect_analysis_style(query),
        ..PreferencesUpdate::default()
    }
}
