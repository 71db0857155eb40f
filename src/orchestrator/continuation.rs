//! Continuation strategy: decides after each decision call whether the loop
//! keeps going, forces a synthesis or stops with the model's answer.

use std::sync::LazyLock;

use regex::Regex;

use crate::tools::ToolClass;

static TECHNICAL_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(technical (analysis|indicators?)|indicators?|rsi|macd|moving averages?)\b")
        .expect("technical intent regex must compile")
});

static QUOTE_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(invest(ing|ment|ments|or|ors)?|should i buy|worth buying)\b")
        .expect("quote intent regex must compile")
});

/// Inputs available to a continuation decision.
#[derive(Debug, Clone, Copy)]
pub struct ContinuationContext<'a> {
    pub query: &'a str,
    /// 1-based index of the decision call just made.
    pub iteration: usize,
    /// Decision calls allowed in total. The synthesis slot is not included.
    pub decision_budget: usize,
    /// Distinct tools called so far in this query.
    pub tools_used: &'a [String],
    /// Free text from the latest decision call.
    pub latest_text: &'a str,
    /// Whether the latest decision call requested tools.
    pub requested_tools: bool,
}

impl ContinuationContext<'_> {
    pub fn has_room(&self) -> bool {
        self.iteration < self.decision_budget
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationDecision {
    /// Run another decision call, optionally after injecting a system nudge.
    Continue { nudge: Option<String> },
    /// Stop calling tools and make the tool-free synthesis call.
    Synthesize,
    /// Accept the latest text as the final answer.
    Stop,
}

/// Pluggable continuation heuristic.
pub trait ContinuationPolicy: Send + Sync {
    fn decide(&self, ctx: &ContinuationContext<'_>) -> ContinuationDecision;
}

const UNFINISHED_PHRASES: &[&str] = &[
    "let me check",
    "let me look",
    "let me fetch",
    "let me get",
    "i'll check",
    "i'll fetch",
    "i will check",
    "i will fetch",
    "i need to check",
    "one moment",
    "next, i",
];

/// Default market-data policy.
///
/// Forces extra iterations while the query asks for a tool class that has not
/// been called yet, up to `max_forced_iteration`.
#[derive(Debug, Clone)]
pub struct MarketContinuationPolicy {
    pub max_forced_iteration: usize,
    /// Distinct tools after which results are synthesized without asking again.
    pub tool_saturation: usize,
}

impl Default for MarketContinuationPolicy {
    fn default() -> Self {
        Self {
            max_forced_iteration: 3,
            tool_saturation: 8,
        }
    }
}

impl MarketContinuationPolicy {
    /// Tool classes the query's wording requires.
    pub fn required_classes(query: &str) -> Vec<ToolClass> {
        let mut classes = Vec::new();
        if TECHNICAL_INTENT_RE.is_match(query) {
            classes.push(ToolClass::Technical);
        }
        if QUOTE_INTENT_RE.is_match(query) {
            classes.push(ToolClass::Quote);
        }
        classes
    }

    fn missing_classes(ctx: &ContinuationContext<'_>) -> Vec<ToolClass> {
        Self::required_classes(ctx.query)
            .into_iter()
            .filter(|class| !ctx.tools_used.iter().any(|t| ToolClass::of(t) == *class))
            .collect()
    }

    fn signals_unfinished(text: &str) -> bool {
        let lower = text.to_lowercase();
        UNFINISHED_PHRASES.iter().any(|p| lower.contains(p))
    }
}

fn suggested_tool(class: ToolClass) -> &'static str {
    match class {
        ToolClass::Technical => "get_technical_indicators",
        ToolClass::Quote => "get_stock_quote",
        ToolClass::Historical => "get_historical_data",
        ToolClass::Index => "get_index_composition",
        ToolClass::MarketStatus => "get_market_status",
        ToolClass::News => "get_market_news",
        ToolClass::Trade => "get_trade_data",
        ToolClass::Fundamentals => "get_company_profile",
        ToolClass::Search | ToolClass::Other => "search_symbols",
    }
}

impl ContinuationPolicy for MarketContinuationPolicy {
    fn decide(&self, ctx: &ContinuationContext<'_>) -> ContinuationDecision {
        if ctx.requested_tools {
            if !ctx.has_room() || ctx.tools_used.len() >= self.tool_saturation {
                return ContinuationDecision::Synthesize;
            }
            return ContinuationDecision::Continue { nudge: None };
        }

        if !ctx.has_room() {
            return ContinuationDecision::Stop;
        }

        let missing = Self::missing_classes(ctx);
        if !missing.is_empty() && ctx.iteration <= self.max_forced_iteration {
            let tools: Vec<&str> = missing.iter().map(|c| suggested_tool(*c)).collect();
            return ContinuationDecision::Continue {
                nudge: Some(format!(
                    "The question needs data you have not fetched yet. Call {} before giving the final answer.",
                    tools.join(" and ")
                )),
            };
        }

        if Self::signals_unfinished(ctx.latest_text) {
            return ContinuationDecision::Continue {
                nudge: Some(
                    "Go ahead and call the tools you mentioned, or give the final answer now."
                        .to_string(),
                ),
            };
        }

        ContinuationDecision::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx<'a>(
        query: &'a str,
        iteration: usize,
        tools_used: &'a [String],
        latest_text: &'a str,
        requested_tools: bool,
    ) -> ContinuationContext<'a> {
        ContinuationContext {
            query,
            iteration,
            decision_budget: 4,
            tools_used,
            latest_text,
            requested_tools,
        }
    }

    #[test]
    fn plain_answer_stops() {
        let policy = MarketContinuationPolicy::default();
        let decision = policy.decide(&ctx("What is the market status?", 1, &[], "Open.", false));
        assert_eq!(decision, ContinuationDecision::Stop);
    }

    #[test]
    fn missing_technical_tool_forces_another_iteration() {
        let policy = MarketContinuationPolicy::default();
        let query = "Use technical indicators: should I invest in AAPL?";
        let decision = policy.decide(&ctx(query, 1, &[], "Probably yes.", false));
        match decision {
            ContinuationDecision::Continue { nudge: Some(nudge) } => {
                assert!(nudge.contains("get_technical_indicators"));
                assert!(nudge.contains("get_stock_quote"));
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        let used = vec!["get_technical_indicators".to_string(), "get_stock_quote".to_string()];
        assert_eq!(
            policy.decide(&ctx(query, 2, &used, "Buy.", false)),
            ContinuationDecision::Stop
        );
    }

    #[test]
    fn forcing_stops_after_third_iteration() {
        let policy = MarketContinuationPolicy {
            max_forced_iteration: 3,
            tool_saturation: 8,
        };
        let mut context = ctx("RSI for MSFT", 4, &[], "It's 55.", false);
        context.decision_budget = 10;
        assert_eq!(policy.decide(&context), ContinuationDecision::Stop);
    }

    #[test]
    fn last_decision_slot_never_continues() {
        let policy = MarketContinuationPolicy::default();
        let query = "technical analysis of NVDA";
        assert_eq!(
            policy.decide(&ctx(query, 4, &[], "Looks strong.", false)),
            ContinuationDecision::Stop
        );
        let used = vec!["get_stock_quote".to_string()];
        assert_eq!(
            policy.decide(&ctx(query, 4, &used, "", true)),
            ContinuationDecision::Synthesize
        );
    }

    #[test]
    fn tool_calls_continue_while_budget_remains() {
        let policy = MarketContinuationPolicy::default();
        let used = vec!["get_stock_quote".to_string()];
        assert_eq!(
            policy.decide(&ctx("price of AAPL", 1, &used, "", true)),
            ContinuationDecision::Continue { nudge: None }
        );
    }

    #[test]
    fn keywords_inside_other_words_do_not_require_tools() {
        for query in [
            "Should I diversify into bonds this year?",
            "Which universities publish market research?",
            "Compare versions of the index methodology",
            "Can you investigate why oil fell?",
        ] {
            assert!(
                MarketContinuationPolicy::required_classes(query).is_empty(),
                "{query}"
            );
        }

        let policy = MarketContinuationPolicy::default();
        assert_eq!(
            policy.decide(&ctx(
                "Should I diversify into bonds this year?",
                1,
                &[],
                "Yes, a 60/40 split is reasonable.",
                false
            )),
            ContinuationDecision::Stop
        );
    }

    #[test]
    fn whole_word_intents_are_recognised() {
        assert_eq!(
            MarketContinuationPolicy::required_classes("What's the RSI on TSLA?"),
            vec![ToolClass::Technical]
        );
        assert_eq!(
            MarketContinuationPolicy::required_classes("Is NVDA a good investment?"),
            vec![ToolClass::Quote]
        );
        assert_eq!(
            MarketContinuationPolicy::required_classes("50-day moving averages, should I buy?"),
            vec![ToolClass::Technical, ToolClass::Quote]
        );
    }

    #[test]
    fn unfinished_phrasing_continues() {
        let policy = MarketContinuationPolicy::default();
        let decision = policy.decide(&ctx("news on TSLA", 1, &[], "Let me check the latest headlines.", false));
        assert!(matches!(decision, ContinuationDecision::Continue { nudge: Some(_) }));
    }
}
