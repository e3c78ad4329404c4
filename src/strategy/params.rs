use crate::data::source::ArchiveDataSource;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Instrument categories the engine wires features by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    Stock,
    Future,
    Option,
}

/// One feature wiring entry: which feature to compute, the key its output is
/// addressed by, and free-form parameters passed through to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub feature_id: String,
    pub feature_key: Option<String>,
    pub params: HashMap<String, Value>,
}

impl FeatureConfig {
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            feature_key: None,
            params: HashMap::new(),
        }
    }

    pub fn with_key(mut self, feature_key: impl Into<String>) -> Self {
        self.feature_key = Some(feature_key.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Key the computed value is addressed by; falls back to the feature id.
    pub fn key(&self) -> &str {
        self.feature_key.as_deref().unwrap_or(&self.feature_id)
    }
}

/// Execution-system thresholds and limits handed to the engine.
///
/// Predictions above `enter_threshold` open longs and below
/// `1 - enter_threshold` open shorts; positions whose prediction drifts into
/// `1 - exit_threshold ..= exit_threshold` are closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub long_limit: f64,
    pub short_limit: f64,
    pub capital_usage_limit: f64,
    pub lot_size: f64,
}

impl ExecutionConfig {
    /// Template defaults, with capital usage capped at 10% of starting
    /// capital.
    pub fn for_capital(starting_capital: f64) -> Self {
        Self {
            enter_threshold: 0.7,
            exit_threshold: 0.55,
            long_limit: 10_000.0,
            short_limit: 10_000.0,
            capital_usage_limit: 0.10 * starting_capital,
            lot_size: 10.0,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::for_capital(1_000_000.0)
    }
}

/// Order-placement implementation the engine should wire in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderPlacer {
    /// Places the requested order and immediately confirms it against the
    /// simulated book.
    Backtesting,
}

/// Everything a strategy tells the backtesting engine about itself: where
/// its data comes from, which features to compute, how predictions map to
/// orders, and how much history to retain.
///
/// Methods with defaults mirror the template's stock choices; a strategy
/// overrides what it needs.
pub trait TradingSystemParams {
    /// Instruments the strategy trades. The benchmark is merged in by
    /// [`universe`](TradingSystemParams::universe).
    fn instrument_ids(&self) -> Vec<String>;

    /// Inclusive simulation date range.
    fn date_range(&self) -> (NaiveDate, NaiveDate);

    /// Data source feeding the engine, configured but not yet loaded.
    fn data_source(&self) -> ArchiveDataSource;

    /// Per-instrument-type feature wiring.
    fn instrument_feature_configs(&self) -> HashMap<InstrumentType, Vec<FeatureConfig>>;

    /// Market-wide feature wiring.
    fn market_feature_configs(&self) -> Vec<FeatureConfig>;

    /// Execution thresholds and limits.
    fn execution(&self) -> ExecutionConfig {
        ExecutionConfig::for_capital(self.starting_capital())
    }

    /// Instrument the strategy's performance is measured against.
    fn benchmark(&self) -> String {
        "SPY".to_string()
    }

    fn starting_capital(&self) -> f64 {
        1_000_000.0
    }

    /// Field used for price calculations (pnl, fees).
    fn price_feature_key(&self) -> String {
        "close".to_string()
    }

    fn order_placer(&self) -> OrderPlacer {
        OrderPlacer::Backtesting
    }

    /// How much feature history the engine retains.
    fn lookback_size(&self) -> usize {
        500
    }

    /// Traded instruments plus the benchmark, deduplicated, order preserved.
    fn universe(&self) -> Vec<String> {
        let mut ids = self.instrument_ids();
        let benchmark = self.benchmark();
        if !ids.contains(&benchmark) {
            ids.push(benchmark);
        }
        ids
    }

    /// Predicted buy probability per instrument: 1.0 is a certain buy, 0.0 a
    /// certain sell, 0.5 fair value.
    ///
    /// The template predicts fair value everywhere; replace this with real
    /// logic built on the computed features.
    fn predictions(
        &self,
        _time: NaiveDateTime,
        _market_features: &HashMap<String, f64>,
        instrument_ids: &[String],
    ) -> HashMap<String, f64> {
        instrument_ids.iter().map(|id| (id.clone(), 0.5)).collect()
    }
}

/// Sample wiring: three large caps against SPY over one month of 2017 data,
/// a single vwap feature, and the default execution config.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateParams;

impl TradingSystemParams for TemplateParams {
    fn instrument_ids(&self) -> Vec<String> {
        vec!["IBM".to_string(), "AAPL".to_string(), "MSFT".to_string()]
    }

    fn date_range(&self) -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2017, 5, 10).unwrap(),
            NaiveDate::from_ymd_opt(2017, 6, 9).unwrap(),
        )
    }

    fn data_source(&self) -> ArchiveDataSource {
        ArchiveDataSource::new("historical_data", "trainingData1", self.universe())
    }

    fn instrument_feature_configs(&self) -> HashMap<InstrumentType, Vec<FeatureConfig>> {
        let vwap = FeatureConfig::new("vwap").with_key("price");
        HashMap::from([(InstrumentType::Stock, vec![vwap])])
    }

    fn market_feature_configs(&self) -> Vec<FeatureConfig> {
        vec![FeatureConfig::new("moving_average")
            .with_key("mv_avg_30")
            .with_param("days", 30)]
    }
}
