//! Bot configuration: YAML file + environment overrides.
//!
//! Secrets (API key material, Telegram token/chat id, database URL) come
//! from the environment and never live in YAML. A trading profile and bot
//! mode apply defaults before per-field overrides are read.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Preset risk appetite applied before explicit overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingProfile {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl TradingProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingProfile::Conservative => "conservative",
            TradingProfile::Balanced => "balanced",
            TradingProfile::Aggressive => "aggressive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "conservative" => Some(TradingProfile::Conservative),
            "balanced" => Some(TradingProfile::Balanced),
            "aggressive" => Some(TradingProfile::Aggressive),
            _ => None,
        }
    }
}

/// Runtime operating mode.
///
/// Transitions into either live mode are two-phase: the pipeline stores the
/// request as pending until an explicit confirmation applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    Custom,
    #[default]
    DemoSafe,
    LiveSafe,
    LiveAuto,
}

impl BotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Custom => "custom",
            BotMode::DemoSafe => "demo_safe",
            BotMode::LiveSafe => "live_safe",
            BotMode::LiveAuto => "live_auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "custom" => Some(BotMode::Custom),
            "demo_safe" => Some(BotMode::DemoSafe),
            "live_safe" => Some(BotMode::LiveSafe),
            "live_auto" => Some(BotMode::LiveAuto),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, BotMode::LiveSafe | BotMode::LiveAuto)
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://kalshi.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalshiApiConfig {
    pub base_url: String,
    /// Generate data locally instead of calling the exchange
    pub stub_mode: bool,
    /// Sign public-data requests too (some deployments require it)
    pub use_auth_for_public_data: bool,
    #[serde(skip)]
    pub api_key_id: String,
    /// PEM path or inline PEM, from the environment
    #[serde(skip)]
    pub private_key_material: String,
}

impl Default for KalshiApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elections.kalshi.com".to_string(),
            stub_mode: true,
            use_auth_for_public_data: false,
            api_key_id: String::new(),
            private_key_material: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub poll_interval_seconds: u64,
    pub market_limit: usize,
    pub target_series_tickers: Vec<String>,
    pub target_market_tickers: Vec<String>,
    pub target_event_tickers: Vec<String>,
    /// Free-text AND-token groups matched against ticker/title/subtitle
    pub target_market_query_groups: Vec<String>,
    pub target_market_status: String,
    pub discovery_pages: usize,
    /// Keep only the nearest live bracket set / contract per series
    pub auto_select_live_contracts: bool,
    pub run_historical_backfill_on_start: bool,
    pub historical_days: i64,
    pub historical_markets: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 300,
            market_limit: 25,
            target_series_tickers: vec!["KXHIGHNY".to_string(), "KXBTC15M".to_string()],
            target_market_tickers: Vec::new(),
            target_event_tickers: Vec::new(),
            target_market_query_groups: Vec::new(),
            target_market_status: "open".to_string(),
            discovery_pages: 3,
            auto_select_live_contracts: true,
            run_historical_backfill_on_start: true,
            historical_days: 7,
            historical_markets: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub min_edge_bps: i64,
    /// Persist flat signals as well
    pub store_all: bool,
    pub edge_decay_alert_threshold_bps: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_edge_bps: 300,
            store_all: false,
            edge_decay_alert_threshold_bps: 75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub ensemble_models: Vec<String>,
    pub forecast_days: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Central Park station
            latitude: 40.78,
            longitude: -73.97,
            timezone: "America/New_York".to_string(),
            ensemble_models: vec![
                "gfs_ensemble".to_string(),
                "ecmwf_ifs025_ensemble".to_string(),
            ],
            forecast_days: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcConfig {
    pub enabled: bool,
    pub symbol: String,
    pub momentum_lookback_minutes: i64,
}

impl Default for BtcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            symbol: "BTCUSD".to_string(),
            momentum_lookback_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueManagementConfig {
    pub enabled: bool,
    /// Reprice when the resting order is deeper than this
    pub max_depth: i64,
    /// Only reprice orders older than this
    pub stale_minutes: i64,
    pub reprice_cooldown_minutes: i64,
    pub reprice_max_per_window: usize,
    pub reprice_window_minutes: i64,
}

impl Default for QueueManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 50,
            stale_minutes: 10,
            reprice_cooldown_minutes: 15,
            reprice_max_per_window: 4,
            reprice_window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTradingConfig {
    pub enabled: bool,
    /// `simulate` or `kalshi_demo`
    pub mode: String,
    /// Sandbox REST base for `kalshi_demo`
    pub base_url: String,
    pub signal_types: Vec<String>,
    pub min_edge_bps: i64,
    pub min_confidence: f64,
    pub cooldown_minutes: i64,
    pub contract_count: i64,
    pub max_orders_per_cycle: usize,
    pub maker_only: bool,
    pub min_price_cents: i64,
    pub max_price_cents: i64,
    /// `kelly` or `fixed`
    pub sizing_mode: String,
    pub kelly_fraction_scale: f64,
    pub max_position_dollars: f64,
    pub max_portfolio_exposure_dollars: f64,
    pub default_fill_probability: f64,
    pub fill_lookback_days: i64,
    pub enable_arbitrage: bool,
    #[serde(default)]
    pub queue_management: QueueManagementConfig,
}

impl Default for PaperTradingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "simulate".to_string(),
            base_url: "https://demo-api.kalshi.co".to_string(),
            signal_types: vec!["weather".to_string(), "btc".to_string()],
            min_edge_bps: 500,
            min_confidence: 0.35,
            cooldown_minutes: 30,
            contract_count: 2,
            max_orders_per_cycle: 6,
            maker_only: true,
            min_price_cents: 5,
            max_price_cents: 95,
            sizing_mode: "kelly".to_string(),
            kelly_fraction_scale: 0.25,
            max_position_dollars: 50.0,
            max_portfolio_exposure_dollars: 500.0,
            default_fill_probability: 0.5,
            fill_lookback_days: 14,
            enable_arbitrage: true,
            queue_management: QueueManagementConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketArbConfig {
    pub enabled: bool,
    pub min_profit_after_fees_cents: i64,
}

impl Default for BracketArbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_profit_after_fees_cents: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherLiveGateConfig {
    pub min_resolved_days: i64,
    /// `market_brier - model_brier` must be at least this
    pub min_brier_advantage: f64,
    pub min_sim_profit_cents: f64,
    pub max_calibration_error: f64,
}

impl Default for WeatherLiveGateConfig {
    fn default() -> Self {
        Self {
            min_resolved_days: 7,
            min_brier_advantage: 0.01,
            min_sim_profit_cents: 0.0,
            max_calibration_error: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub enabled: bool,
    #[serde(skip)]
    pub bot_token: String,
    #[serde(skip)]
    pub chat_id: String,
    pub notify_actionable_only: bool,
    pub min_edge_bps: i64,
    pub notify_execution_events: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            notify_actionable_only: true,
            min_edge_bps: 300,
            notify_execution_events: true,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Complete bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub profile: TradingProfile,
    #[serde(default)]
    pub mode: BotMode,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kalshi: KalshiApiConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub btc: BtcConfig,
    #[serde(default)]
    pub paper_trading: PaperTradingConfig,
    #[serde(default)]
    pub bracket_arb: BracketArbConfig,
    #[serde(default)]
    pub weather_live_gate: WeatherLiveGateConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: TradingProfile::default(),
            mode: BotMode::default(),
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            kalshi: KalshiApiConfig::default(),
            discovery: DiscoveryConfig::default(),
            signals: SignalConfig::default(),
            weather: WeatherConfig::default(),
            btc: BtcConfig::default(),
            paper_trading: PaperTradingConfig::default(),
            bracket_arb: BracketArbConfig::default(),
            weather_live_gate: WeatherLiveGateConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Settings {
    /// Load from a YAML file, then apply profile/mode defaults and
    /// environment overrides.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path)?;
        let mut settings: Settings = serde_yaml::from_str(&yaml_content)?;
        settings.finish_load()
    }

    /// Build from defaults plus the environment only (no YAML on disk).
    pub fn from_env() -> Result<Self> {
        Settings::default().finish_load()
    }

    fn finish_load(mut self) -> Result<Self> {
        dotenv::dotenv().ok();

        if let Ok(profile) = std::env::var("TRADING_PROFILE") {
            if let Some(parsed) = TradingProfile::parse(&profile) {
                self.profile = parsed;
            }
        }
        if let Ok(mode) = std::env::var("BOT_MODE") {
            if let Some(parsed) = BotMode::parse(&mode) {
                self.mode = parsed;
            }
        }
        self.apply_profile();
        self.apply_mode();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            info!("Overriding database URL from environment variable");
            self.database.url = url;
        }
        if let Ok(key_id) = std::env::var("KALSHI_API_KEY_ID") {
            self.kalshi.api_key_id = key_id;
        }
        if let Ok(path) = std::env::var("KALSHI_PRIVATE_KEY_PATH") {
            self.kalshi.private_key_material = path;
        } else if let Ok(secret) = std::env::var("KALSHI_API_KEY_SECRET") {
            self.kalshi.private_key_material = secret;
        }
        if let Ok(stub) = std::env::var("KALSHI_STUB_MODE") {
            self.kalshi.stub_mode = parse_bool(&stub, self.kalshi.stub_mode);
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }

        self.validate()?;
        Ok(self)
    }

    /// Apply profile presets to the sizing/risk knobs.
    fn apply_profile(&mut self) {
        let pt = &mut self.paper_trading;
        match self.profile {
            TradingProfile::Conservative => {
                pt.kelly_fraction_scale = 0.10;
                pt.min_edge_bps = 800;
                pt.min_confidence = 0.50;
                pt.max_position_dollars = 25.0;
                pt.max_portfolio_exposure_dollars = 250.0;
                pt.max_orders_per_cycle = 3;
                pt.maker_only = true;
            }
            TradingProfile::Balanced => {
                pt.kelly_fraction_scale = 0.25;
                pt.min_edge_bps = 500;
                pt.min_confidence = 0.35;
                pt.max_position_dollars = 50.0;
                pt.max_portfolio_exposure_dollars = 500.0;
                pt.max_orders_per_cycle = 6;
                pt.maker_only = true;
            }
            TradingProfile::Aggressive => {
                pt.kelly_fraction_scale = 0.50;
                pt.min_edge_bps = 300;
                pt.min_confidence = 0.25;
                pt.max_position_dollars = 100.0;
                pt.max_portfolio_exposure_dollars = 1000.0;
                pt.max_orders_per_cycle = 10;
                pt.maker_only = false;
            }
        }
    }

    /// Apply mode presets. Live transitions at runtime still require the
    /// two-phase confirmation in the pipeline.
    fn apply_mode(&mut self) {
        match self.mode {
            BotMode::Custom => {}
            BotMode::DemoSafe => {
                self.paper_trading.enabled = true;
                self.paper_trading.mode = "kalshi_demo".to_string();
            }
            BotMode::LiveSafe => {
                self.paper_trading.enabled = false;
                self.kalshi.stub_mode = false;
            }
            BotMode::LiveAuto => {
                self.paper_trading.enabled = true;
                self.kalshi.stub_mode = false;
            }
        }
    }

    /// True when startup auto-trading should be on, before runtime
    /// pause/mode commands.
    pub fn auto_trading_enabled(&self) -> bool {
        match self.mode {
            BotMode::LiveSafe => false,
            BotMode::LiveAuto | BotMode::DemoSafe => self.paper_trading.enabled,
            BotMode::Custom => self.paper_trading.enabled,
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.paper_trading.mode == "kalshi_demo"
    }

    fn validate(&self) -> Result<()> {
        if self.discovery.poll_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.discovery.market_limit == 0 {
            return Err(ConfigError::ValidationError(
                "market_limit must be greater than 0".to_string(),
            ));
        }
        let kelly = self.paper_trading.kelly_fraction_scale;
        if !(0.0..=1.0).contains(&kelly) {
            return Err(ConfigError::ValidationError(
                "kelly_fraction_scale must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.paper_trading.min_confidence) {
            return Err(ConfigError::ValidationError(
                "min_confidence must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.paper_trading.default_fill_probability) {
            return Err(ConfigError::ValidationError(
                "default_fill_probability must be between 0 and 1".to_string(),
            ));
        }
        let (min_px, max_px) = (
            self.paper_trading.min_price_cents,
            self.paper_trading.max_price_cents,
        );
        if !(1..=99).contains(&min_px) || !(1..=99).contains(&max_px) || min_px > max_px {
            return Err(ConfigError::ValidationError(
                "price bounds must satisfy 1 <= min <= max <= 99".to_string(),
            ));
        }
        match self.paper_trading.sizing_mode.as_str() {
            "kelly" | "fixed" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "sizing_mode must be kelly or fixed, got {other}"
                )))
            }
        }
        match self.paper_trading.mode.as_str() {
            "simulate" | "kalshi_demo" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "paper_trading.mode must be simulate or kalshi_demo, got {other}"
                )))
            }
        }
        if self.mode.is_live() && !self.kalshi.stub_mode {
            if self.kalshi.api_key_id.is_empty() || self.kalshi.private_key_material.is_empty() {
                return Err(ConfigError::ValidationError(
                    "live modes require KALSHI_API_KEY_ID and private key material".to_string(),
                ));
            }
        }
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration loaded:");
        info!("  Profile: {}", self.profile.as_str());
        info!("  Mode: {}", self.mode.as_str());
        info!("  Poll interval: {}s", self.discovery.poll_interval_seconds);
        info!(
            "  Target series: {}",
            self.discovery.target_series_tickers.join(",")
        );
        info!("  Kalshi stub mode: {}", self.kalshi.stub_mode);
        info!(
            "  Paper trading: enabled={} mode={} sizing={}",
            self.paper_trading.enabled,
            self.paper_trading.mode,
            self.paper_trading.sizing_mode
        );
        info!(
            "  Bracket arb: enabled={} min_profit={}c",
            self.bracket_arb.enabled, self.bracket_arb.min_profit_after_fees_cents
        );
        info!("  Telegram: enabled={}", self.telegram.enabled);
        info!("  Database url: {}", self.database.url);
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.discovery.poll_interval_seconds, 300);
        assert!(settings.kalshi.stub_mode);
    }

    #[test]
    fn profile_presets_apply() {
        let mut settings = Settings {
            profile: TradingProfile::Conservative,
            ..Settings::default()
        };
        settings.apply_profile();
        assert_eq!(settings.paper_trading.kelly_fraction_scale, 0.10);
        assert_eq!(settings.paper_trading.min_edge_bps, 800);
        assert!(settings.paper_trading.maker_only);

        settings.profile = TradingProfile::Aggressive;
        settings.apply_profile();
        assert_eq!(settings.paper_trading.kelly_fraction_scale, 0.50);
        assert!(!settings.paper_trading.maker_only);
    }

    #[test]
    fn demo_safe_mode_forces_sandbox() {
        let mut settings = Settings {
            mode: BotMode::DemoSafe,
            ..Settings::default()
        };
        settings.apply_mode();
        assert!(settings.is_sandbox());
        assert!(settings.auto_trading_enabled());
    }

    #[test]
    fn live_safe_disables_auto_trading() {
        let mut settings = Settings {
            mode: BotMode::LiveSafe,
            ..Settings::default()
        };
        settings.apply_mode();
        assert!(!settings.auto_trading_enabled());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.paper_trading.kelly_fraction_scale = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.paper_trading.min_price_cents = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.paper_trading.sizing_mode = "martingale".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.mode = BotMode::LiveAuto;
        settings.kalshi.stub_mode = false;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
profile: aggressive
mode: custom
discovery:
  poll_interval_seconds: 60
  market_limit: 10
  target_series_tickers: ["KXHIGHNY"]
  target_market_tickers: []
  target_event_tickers: []
  target_market_query_groups: []
  target_market_status: open
  discovery_pages: 2
  auto_select_live_contracts: true
  run_historical_backfill_on_start: false
  historical_days: 3
  historical_markets: 5
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.profile, TradingProfile::Aggressive);
        assert_eq!(settings.discovery.poll_interval_seconds, 60);
        assert!(!settings.discovery.run_historical_backfill_on_start);
        // Untouched sections fall back to defaults.
        assert_eq!(settings.btc.momentum_lookback_minutes, 10);
    }
}
