//! Purpose labels for iteration records.

use crate::tools::ToolClass;

pub const GENERIC_PURPOSE: &str = "gathering market data";

fn label(class: ToolClass) -> Option<&'static str> {
    Some(match class {
        ToolClass::Quote => "checking current prices",
        ToolClass::Historical => "reviewing price history",
        ToolClass::Technical => "computing technical indicators",
        ToolClass::Index => "examining index composition",
        ToolClass::MarketStatus => "checking market status",
        ToolClass::News => "collecting market news",
        ToolClass::Trade => "gathering trade information",
        ToolClass::Fundamentals => "reviewing company fundamentals",
        ToolClass::Search => "looking up symbols",
        ToolClass::Other => return None,
    })
}

/// Describe what an iteration was doing from the tools it called.
pub fn infer_purpose<S: AsRef<str>>(tools: &[S]) -> String {
    let mut labels: Vec<&'static str> = Vec::new();
    for tool in tools {
        if let Some(l) = label(ToolClass::of(tool.as_ref())) {
            if !labels.contains(&l) {
                labels.push(l);
            }
        }
    }
    match labels.as_slice() {
        [] => GENERIC_PURPOSE.to_string(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_class_uses_its_label() {
        assert_eq!(infer_purpose(&["get_trade_data"]), "gathering trade information");
    }

    #[test]
    fn mixed_classes_are_joined_in_call_order() {
        assert_eq!(
            infer_purpose(&["get_stock_quote", "get_technical_indicators", "get_stock_quote"]),
            "checking current prices and computing technical indicators"
        );
        assert_eq!(
            infer_purpose(&["get_market_news", "search_symbols", "get_company_profile"]),
            "collecting market news, looking up symbols and reviewing company fundamentals"
        );
    }

    #[test]
    fn unknown_tools_get_generic_label() {
        assert_eq!(infer_purpose(&["mystery_tool"]), GENERIC_PURPOSE);
        let none: [&str; 0] = [];
        assert_eq!(infer_purpose(&none), GENERIC_PURPOSE);
    }
}
