//! Market-data tool catalog.
//!
//! Each catalog entry is decoded from `(name, arguments)` into a
//! [`MarketToolCall`] variant before reaching the backend, so backends match
//! on typed values instead of poking at JSON.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use super::types::{ToolDefinition, ToolParameters};
use crate::error::MarketMindError;

/// History window accepted by `get_historical_data`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum HistoryPeriod {
    #[serde(rename = "1d")]
    #[strum(serialize = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    #[strum(serialize = "5d")]
    FiveDays,
    #[serde(rename = "1mo")]
    #[strum(serialize = "1mo")]
    OneMonth,
    #[serde(rename = "6mo")]
    #[strum(serialize = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    #[strum(serialize = "1y")]
    OneYear,
    #[serde(rename = "5y")]
    #[strum(serialize = "5y")]
    FiveYears,
}

const HISTORY_PERIODS: &[&str] = &["1d", "5d", "1mo", "6mo", "1y", "5y"];
const INTERVALS: &[&str] = &["1m", "5m", "1h", "1d", "1wk", "1mo"];

/// A decoded market tool invocation, keyed by tool name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, IntoStaticStr)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MarketToolCall {
    GetStockQuote {
        symbol: String,
    },
    GetHistoricalData {
        symbol: String,
        #[serde(default)]
        period: Option<HistoryPeriod>,
        #[serde(default)]
        interval: Option<String>,
    },
    GetIndexComposition {
        index: String,
    },
    GetMarketStatus {
        #[serde(default)]
        market: Option<String>,
    },
    GetTechnicalIndicators {
        symbol: String,
        indicators: Vec<String>,
        #[serde(default)]
        window: Option<u32>,
    },
    SearchSymbols {
        query: String,
        #[serde(default)]
        limit: Option<u32>,
    },
    GetCompanyProfile {
        symbol: String,
    },
    GetMarketNews {
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
    GetTradeData {
        symbol: String,
        #[serde(default)]
        limit: Option<u32>,
    },
}

impl MarketToolCall {
    /// Decode a call from the tool name and its (already validated) arguments.
    pub fn decode(name: &str, args: &ToolArguments) -> Result<Self, MarketMindError> {
        let arguments = match args.raw() {
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        serde_json::from_value(serde_json::json!({ "name": name, "arguments": arguments }))
            .map_err(|e| MarketMindError::InvalidArgument(format!("{name}: {e}")))
    }

    /// Tool name this call was decoded from.
    pub fn tool_name(&self) -> &'static str {
        self.into()
    }

    /// Primary symbol the call refers to, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::GetStockQuote { symbol }
            | Self::GetHistoricalData { symbol, .. }
            | Self::GetTechnicalIndicators { symbol, .. }
            | Self::GetCompanyProfile { symbol }
            | Self::GetTradeData { symbol, .. } => Some(symbol),
            Self::GetMarketNews { symbol, .. } => symbol.as_deref(),
            Self::GetIndexComposition { .. }
            | Self::GetMarketStatus { .. }
            | Self::SearchSymbols { .. } => None,
        }
    }
}

/// Backend that serves decoded market tool calls.
#[async_trait]
pub trait MarketDataBackend: Send + Sync {
    async fn call(&self, call: MarketToolCall) -> Result<serde_json::Value, MarketMindError>;
}

/// Catalog entries for every market tool, in a stable order.
pub fn market_tool_definitions() -> Vec<ToolDefinition> {
    catalog()
        .into_iter()
        .map(|(name, description, parameters)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: parameters.schema,
        })
        .collect()
}

/// Build one [`Tool`] per catalog entry, all served by `backend`.
pub fn market_tools(backend: Arc<dyn MarketDataBackend>) -> Vec<Arc<dyn Tool>> {
    catalog()
        .into_iter()
        .map(|(name, description, parameters)| {
            Arc::new(MarketTool {
                backend: backend.clone(),
                name,
                description,
                parameters,
            }) as Arc<dyn Tool>
        })
        .collect()
}

fn catalog() -> Vec<(&'static str, &'static str, ToolParameters)> {
    vec![
        (
            "get_stock_quote",
            "Current price, change and volume for a ticker symbol",
            ToolParameters::object()
                .string("symbol", "Ticker symbol, e.g. AAPL", true)
                .build(),
        ),
        (
            "get_historical_data",
            "Historical OHLCV bars for a ticker symbol",
            ToolParameters::object()
                .string("symbol", "Ticker symbol", true)
                .string_enum("period", "Lookback window", HISTORY_PERIODS, false)
                .string_enum("interval", "Bar interval", INTERVALS, false)
                .build(),
        ),
        (
            "get_index_composition",
            "Constituents and weights of a market index",
            ToolParameters::object()
                .string("index", "Index identifier, e.g. SPX or NDX", true)
                .build(),
        ),
        (
            "get_market_status",
            "Whether markets are open, with session times",
            ToolParameters::object()
                .string("market", "Market or exchange code", false)
                .build(),
        ),
        (
            "get_technical_indicators",
            "Technical indicators such as RSI, MACD or moving averages for a symbol",
            ToolParameters::object()
                .string("symbol", "Ticker symbol", true)
                .string_array("indicators", "Indicator names, e.g. rsi, macd, sma", true)
                .integer("window", "Lookback window in bars", false)
                .build(),
        ),
        (
            "search_symbols",
            "Search ticker symbols by company name or keyword",
            ToolParameters::object()
                .string("query", "Free-text search query", true)
                .integer("limit", "Maximum number of matches", false)
                .build(),
        ),
        (
            "get_company_profile",
            "Company profile and fundamentals for a symbol",
            ToolParameters::object()
                .string("symbol", "Ticker symbol", true)
                .build(),
        ),
        (
            "get_market_news",
            "Recent market news, optionally filtered by symbol",
            ToolParameters::object()
                .string("symbol", "Ticker symbol", false)
                .integer("limit", "Maximum number of articles", false)
                .build(),
        ),
        (
            "get_trade_data",
            "Recent trades and block activity for a symbol",
            ToolParameters::object()
                .string("symbol", "Ticker symbol", true)
                .integer("limit", "Maximum number of trades", false)
                .build(),
        ),
    ]
}

/// Adapter that exposes one market catalog entry through the core [`Tool`] trait.
pub struct MarketTool {
    backend: Arc<dyn MarketDataBackend>,
    name: &'static str,
    description: &'static str,
    parameters: ToolParameters,
}

#[async_trait]
impl Tool for MarketTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, MarketMindError> {
        let call = MarketToolCall::decode(self.name, args)?;
        self.backend.call(call).await
    }
}

/// Coarse tool families used for intent checks and purpose labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ToolClass {
    Quote,
    Historical,
    Technical,
    Index,
    MarketStatus,
    News,
    Trade,
    Fundamentals,
    Search,
    Other,
}

impl ToolClass {
    /// Classify a tool by name. Unknown names fall into [`ToolClass::Other`].
    pub fn of(tool_name: &str) -> Self {
        let name = tool_name.to_ascii_lowercase();
        if name.contains("technical") || name.contains("indicator") {
            Self::Technical
        } else if name.contains("historical") || name.contains("history") {
            Self::Historical
        } else if name.contains("index") || name.contains("constituent") {
            Self::Index
        } else if name.contains("market_status") || name.contains("market_hours") {
            Self::MarketStatus
        } else if name.contains("news") {
            Self::News
        } else if name.contains("trade") {
            Self::Trade
        } else if name.contains("profile") || name.contains("fundamental") {
            Self::Fundamentals
        } else if name.contains("search") {
            Self::Search
        } else if name.contains("quote") || name.contains("price") {
            Self::Quote
        } else {
            Self::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingBackend {
        calls: Mutex<Vec<MarketToolCall>>,
    }

    #[async_trait]
    impl MarketDataBackend for RecordingBackend {
        async fn call(&self, call: MarketToolCall) -> Result<serde_json::Value, MarketMindError> {
            let symbol = call.symbol().map(str::to_string);
            self.calls.lock().expect("lock").push(call);
            Ok(serde_json::json!({ "symbol": symbol }))
        }
    }

    #[test]
    fn decodes_typed_variant_from_name_and_arguments() {
        let args = ToolArguments::new(serde_json::json!({
            "symbol": "NVDA",
            "period": "6mo",
        }));
        let call = MarketToolCall::decode("get_historical_data", &args).unwrap();
        assert_eq!(
            call,
            MarketToolCall::GetHistoricalData {
                symbol: "NVDA".to_string(),
                period: Some(HistoryPeriod::SixMonths),
                interval: None,
            }
        );
        assert_eq!(call.tool_name(), "get_historical_data");
    }

    #[test]
    fn decodes_argumentless_call_from_null() {
        let call = MarketToolCall::decode("get_market_status", &ToolArguments::new(serde_json::Value::Null))
            .unwrap();
        assert_eq!(call, MarketToolCall::GetMarketStatus { market: None });
    }

    #[test]
    fn unknown_tool_name_fails_to_decode() {
        let err = MarketToolCall::decode("get_weather", &ToolArguments::new(serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, MarketMindError::InvalidArgument(_)));
    }

    #[test]
    fn definitions_cover_every_variant_name() {
        let names: Vec<String> = market_tool_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"get_technical_indicators".to_string()));
        assert!(names.contains(&"get_trade_data".to_string()));
    }

    #[tokio::test]
    async fn market_tool_passes_decoded_call_to_backend() {
        let backend = Arc::new(RecordingBackend {
            calls: Mutex::new(Vec::new()),
        });
        let tools = market_tools(backend.clone());
        let quote = tools
            .iter()
            .find(|t| t.name() == "get_stock_quote")
            .expect("quote tool registered");

        let result = quote
            .execute(
                &ToolArguments::new(serde_json::json!({"symbol": "AAPL"})),
                &ToolExecutionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(result["symbol"], "AAPL");
        let calls = backend.calls.lock().expect("lock");
        assert_eq!(
            calls.as_slice(),
            &[MarketToolCall::GetStockQuote {
                symbol: "AAPL".to_string()
            }]
        );
    }

    #[test]
    fn classifies_tool_names() {
        assert_eq!(ToolClass::of("get_technical_indicators"), ToolClass::Technical);
        assert_eq!(ToolClass::of("get_historical_data"), ToolClass::Historical);
        assert_eq!(ToolClass::of("get_trade_data"), ToolClass::Trade);
        assert_eq!(ToolClass::of("get_stock_quote"), ToolClass::Quote);
        assert_eq!(ToolClass::of("get_index_composition"), ToolClass::Index);
        assert_eq!(ToolClass::of("get_market_status"), ToolClass::MarketStatus);
        assert_eq!(ToolClass::of("mystery"), ToolClass::Other);
    }
}
