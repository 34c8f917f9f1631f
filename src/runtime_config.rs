// =============================================================================
// Bot Configuration — one immutable value built at start-up
// =============================================================================
//
// Every tunable of the cycle lives here: instrument, sizing, TWAP pacing, hold
// window, risk thresholds and the close-protocol budgets. The value is built
// once in `main` and handed to each component by reference.
//
// All fields carry `#[serde(default)]` so that a partial JSON file (or an
// empty one) still loads. Credentials are NOT part of this struct; they are
// read from the environment by `main` and never serialised.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AccountMode, LotRule};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "WAL-PERP".to_string()
}

fn default_margin_usd() -> f64 {
    1.0
}

fn default_leverage() -> u32 {
    5
}

fn default_twap_slices() -> u32 {
    5
}

fn default_twap_interval_secs() -> f64 {
    1.0
}

fn default_hold_min_secs() -> f64 {
    60.0
}

fn default_hold_max_secs() -> f64 {
    90.0
}

fn default_wait_min_secs() -> f64 {
    60.0
}

fn default_wait_max_secs() -> f64 {
    90.0
}

fn default_stop_loss_usd() -> f64 {
    -0.05
}

fn default_take_profit_usd() -> f64 {
    0.09
}

fn default_close_retries() -> u32 {
    3
}

fn default_confirm_budget() -> u32 {
    10
}

fn default_max_position_size() -> f64 {
    100.0
}

fn default_anomaly_tolerance() -> f64 {
    0.01
}

fn default_order_ttl_ms() -> u64 {
    60_000
}

fn default_paper_start_price() -> f64 {
    0.45
}

// =============================================================================
// Timings
// =============================================================================

fn default_unchanged_backoff_secs() -> f64 {
    30.0
}

fn default_close_settle_secs() -> f64 {
    15.0
}

fn default_force_settle_secs() -> f64 {
    12.0
}

fn default_exit_settle_secs() -> f64 {
    12.0
}

fn default_open_check_attempts() -> u32 {
    3
}

fn default_open_check_interval_secs() -> f64 {
    10.0
}

fn default_open_extended_wait_secs() -> f64 {
    15.0
}

fn default_monitor_poll_secs() -> f64 {
    1.0
}

fn default_status_interval_secs() -> f64 {
    10.0
}

fn default_error_cooldown_secs() -> f64 {
    5.0
}

/// Fixed delays used by the close protocol, open confirmation and hold loop.
///
/// Separate from the trading parameters so tests and slow venues can tune
/// pacing without touching sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timings {
    /// Wait when two consecutive close observations show the same size.
    #[serde(default = "default_unchanged_backoff_secs")]
    pub unchanged_backoff_secs: f64,

    /// Wait after the first close order of a pass.
    #[serde(default = "default_close_settle_secs")]
    pub close_settle_secs: f64,

    /// Wait after the force-close resubmission.
    #[serde(default = "default_force_settle_secs")]
    pub force_settle_secs: f64,

    /// Wait after each exit-sequence attempt.
    #[serde(default = "default_exit_settle_secs")]
    pub exit_settle_secs: f64,

    /// Number of regular open-confirmation polls.
    #[serde(default = "default_open_check_attempts")]
    pub open_check_attempts: u32,

    #[serde(default = "default_open_check_interval_secs")]
    pub open_check_interval_secs: f64,

    /// Final extra wait before declaring the open failed.
    #[serde(default = "default_open_extended_wait_secs")]
    pub open_extended_wait_secs: f64,

    #[serde(default = "default_monitor_poll_secs")]
    pub monitor_poll_secs: f64,

    /// Minimum spacing between hold-status message edits.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: f64,

    /// Pause after a cycle failed with an error.
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: f64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            unchanged_backoff_secs: default_unchanged_backoff_secs(),
            close_settle_secs: default_close_settle_secs(),
            force_settle_secs: default_force_settle_secs(),
            exit_settle_secs: default_exit_settle_secs(),
            open_check_attempts: default_open_check_attempts(),
            open_check_interval_secs: default_open_check_interval_secs(),
            open_extended_wait_secs: default_open_extended_wait_secs(),
            monitor_poll_secs: default_monitor_poll_secs(),
            status_interval_secs: default_status_interval_secs(),
            error_cooldown_secs: default_error_cooldown_secs(),
        }
    }
}

/// Convert a (validated, non-negative) seconds value into a `Duration`.
pub fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the cycler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // --- Venue ----------------------------------------------------------------

    /// Paper (simulated) or Live.
    #[serde(default)]
    pub account_mode: AccountMode,

    /// Instrument symbol, e.g. "WAL-PERP".
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Lot-size rule for `symbol`.
    #[serde(default)]
    pub lot_rule: LotRule,

    // --- Sizing ---------------------------------------------------------------

    /// Margin committed per slice, in quote currency.
    #[serde(default = "default_margin_usd")]
    pub margin_usd: f64,

    #[serde(default = "default_leverage")]
    pub leverage: u32,

    /// Hard cap on a single slice's quantity.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    // --- TWAP -----------------------------------------------------------------

    #[serde(default = "default_twap_slices")]
    pub twap_slices: u32,

    #[serde(default = "default_twap_interval_secs")]
    pub twap_interval_secs: f64,

    // --- Hold / cycle pacing --------------------------------------------------

    #[serde(default = "default_hold_min_secs")]
    pub hold_min_secs: f64,

    #[serde(default = "default_hold_max_secs")]
    pub hold_max_secs: f64,

    /// Inter-cycle delay range.
    #[serde(default = "default_wait_min_secs")]
    pub wait_min_secs: f64,

    #[serde(default = "default_wait_max_secs")]
    pub wait_max_secs: f64,

    // --- Risk -----------------------------------------------------------------

    /// Unrealised PnL (quote currency) at or below which the hold ends.
    /// Must be negative.
    #[serde(default = "default_stop_loss_usd")]
    pub stop_loss_usd: f64,

    /// Unrealised PnL at or above which the hold ends.
    #[serde(default = "default_take_profit_usd")]
    pub take_profit_usd: f64,

    // --- Close protocol -------------------------------------------------------

    /// Ordinary attempts of the post-hold exit sequence.
    #[serde(default = "default_close_retries")]
    pub close_retries: u32,

    /// Force-close rounds (and unchanged back-offs) allowed before escalating.
    #[serde(default = "default_confirm_budget")]
    pub close_confirm_budget: u32,

    /// Size delta under which two observations count as "unchanged".
    #[serde(default = "default_anomaly_tolerance")]
    pub anomaly_tolerance: f64,

    /// Signed-order lifetime.
    #[serde(default = "default_order_ttl_ms")]
    pub order_ttl_ms: u64,

    // --- Paper exchange -------------------------------------------------------

    #[serde(default = "default_paper_start_price")]
    pub paper_start_price: f64,

    #[serde(default)]
    pub timings: Timings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Paper,
            symbol: default_symbol(),
            lot_rule: LotRule::WholeUnits,
            margin_usd: default_margin_usd(),
            leverage: default_leverage(),
            max_position_size: default_max_position_size(),
            twap_slices: default_twap_slices(),
            twap_interval_secs: default_twap_interval_secs(),
            hold_min_secs: default_hold_min_secs(),
            hold_max_secs: default_hold_max_secs(),
            wait_min_secs: default_wait_min_secs(),
            wait_max_secs: default_wait_max_secs(),
            stop_loss_usd: default_stop_loss_usd(),
            take_profit_usd: default_take_profit_usd(),
            close_retries: default_close_retries(),
            close_confirm_budget: default_confirm_budget(),
            anomaly_tolerance: default_anomaly_tolerance(),
            order_ttl_ms: default_order_ttl_ms(),
            paper_start_price: default_paper_start_price(),
            timings: Timings::default(),
        }
    }
}

impl BotConfig {
    /// Parse the JSON file at `path`. A missing, unreadable or malformed
    /// file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid bot config", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            account_mode = %config.account_mode,
            "bot config loaded"
        );
        Ok(config)
    }

    /// Load `path`, or start from defaults when it does not exist yet and
    /// write them there as a template. A file that exists but cannot be
    /// parsed is returned as an error, never replaced by defaults.
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(path = %path.display(), "bot config not found, using defaults");
        let defaults = Self::default();
        if let Err(e) = defaults.save(path) {
            warn!(path = %path.display(), error = %format!("{e:#}"), "could not write config template");
        }
        Ok(defaults)
    }

    /// Write the config as pretty JSON. The file is replaced atomically via
    /// a sibling `.json.tmp`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = serde_json::to_string_pretty(self).context("cannot serialise bot config")?;

        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, body)
            .with_context(|| format!("cannot write {}", staging.display()))?;
        std::fs::rename(&staging, path)
            .with_context(|| format!("cannot move {} into place", staging.display()))?;

        info!(path = %path.display(), "bot config written");
        Ok(())
    }

    /// Apply `BOT_*` overrides from a variable lookup.
    ///
    /// Unparseable values are ignored with a warning; the file value stays.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sym) = lookup("BOT_SYMBOL") {
            let sym = sym.trim().to_uppercase();
            if !sym.is_empty() {
                self.symbol = sym;
            }
        }
        if let Some(raw) = lookup("BOT_ACCOUNT_MODE") {
            match raw.parse() {
                Ok(mode) => self.account_mode = mode,
                Err(e) => warn!(error = %e, "ignoring BOT_ACCOUNT_MODE"),
            }
        }
        if let Some(raw) = lookup("BOT_MARGIN_USD") {
            match raw.trim().parse() {
                Ok(v) => self.margin_usd = v,
                Err(e) => warn!(value = %raw, error = %e, "ignoring BOT_MARGIN_USD"),
            }
        }
        if let Some(raw) = lookup("BOT_LEVERAGE") {
            match raw.trim().parse() {
                Ok(v) => self.leverage = v,
                Err(e) => warn!(value = %raw, error = %e, "ignoring BOT_LEVERAGE"),
            }
        }
    }

    /// Reject configurations the cycle cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.symbol.trim().is_empty(), "symbol must not be empty");
        ensure!(self.margin_usd > 0.0, "margin_usd must be positive");
        ensure!(self.leverage > 0, "leverage must be at least 1");
        ensure!(self.max_position_size > 0.0, "max_position_size must be positive");
        ensure!(self.twap_slices > 0, "twap_slices must be at least 1");
        ensure!(self.twap_interval_secs >= 0.0, "twap_interval_secs must not be negative");
        ensure!(
            0.0 <= self.hold_min_secs && self.hold_min_secs <= self.hold_max_secs,
            "hold range is invalid: {}..{}",
            self.hold_min_secs,
            self.hold_max_secs
        );
        ensure!(
            0.0 <= self.wait_min_secs && self.wait_min_secs <= self.wait_max_secs,
            "wait range is invalid: {}..{}",
            self.wait_min_secs,
            self.wait_max_secs
        );
        ensure!(self.stop_loss_usd < 0.0, "stop_loss_usd must be negative");
        ensure!(self.take_profit_usd > 0.0, "take_profit_usd must be positive");
        ensure!(self.close_confirm_budget > 0, "close_confirm_budget must be at least 1");
        ensure!(self.anomaly_tolerance >= 0.0, "anomaly_tolerance must not be negative");
        ensure!(self.order_ttl_ms > 0, "order_ttl_ms must be positive");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.account_mode, AccountMode::Paper);
        assert_eq!(cfg.symbol, "WAL-PERP");
        assert_eq!(cfg.lot_rule, LotRule::WholeUnits);
        assert_eq!(cfg.twap_slices, 5);
        assert_eq!(cfg.leverage, 5);
        assert_eq!(cfg.close_retries, 3);
        assert_eq!(cfg.close_confirm_budget, 10);
        assert_eq!(cfg.order_ttl_ms, 60_000);
        assert!((cfg.stop_loss_usd + 0.05).abs() < f64::EPSILON);
        assert!((cfg.take_profit_usd - 0.09).abs() < f64::EPSILON);
        assert!((cfg.anomaly_tolerance - 0.01).abs() < f64::EPSILON);
        assert!((cfg.timings.unchanged_backoff_secs - 30.0).abs() < f64::EPSILON);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "WAL-PERP");
        assert_eq!(cfg.close_confirm_budget, 10);
        assert!((cfg.timings.close_settle_secs - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "account_mode": "Live", "symbol": "SUI-PERP", "lot_rule": "Decimal",
                        "timings": { "force_settle_secs": 3.0 } }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Live);
        assert_eq!(cfg.symbol, "SUI-PERP");
        assert_eq!(cfg.lot_rule, LotRule::Decimal);
        assert!((cfg.timings.force_settle_secs - 3.0).abs() < f64::EPSILON);
        assert!((cfg.timings.exit_settle_secs - 12.0).abs() < f64::EPSILON);
        assert_eq!(cfg.twap_slices, 5);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = std::env::temp_dir().join(format!("twap-cycler-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot_config.json");

        let mut cfg = BotConfig::default();
        cfg.symbol = "ETH-PERP".into();
        cfg.close_confirm_budget = 4;
        cfg.save(&path).unwrap();

        let loaded = BotConfig::load(&path).unwrap();
        assert_eq!(loaded.symbol, "ETH-PERP");
        assert_eq!(loaded.close_confirm_budget, 4);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(BotConfig::load("/definitely/not/here.json").is_err());
    }

    #[test]
    fn missing_file_starts_from_defaults_and_writes_template() {
        let dir = std::env::temp_dir().join(format!("twap-cycler-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot_config.json");

        let cfg = BotConfig::load_or_init(&path).unwrap();
        assert_eq!(cfg.leverage, 5);
        assert!(path.exists());
        assert_eq!(BotConfig::load(&path).unwrap().symbol, cfg.symbol);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_file_is_an_error_not_defaults() {
        let dir = std::env::temp_dir().join(format!("twap-cycler-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot_config.json");
        std::fs::write(&path, r#"{"leverage": 2,"#).unwrap();

        let err = BotConfig::load_or_init(&path).unwrap_err();
        assert!(format!("{err:#}").contains("not a valid bot config"));
        // The operator's file is left untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"leverage": 2,"#);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BOT_SYMBOL", " btc-perp "),
            ("BOT_ACCOUNT_MODE", "live"),
            ("BOT_MARGIN_USD", "2.5"),
            ("BOT_LEVERAGE", "not-a-number"),
        ]);
        let mut cfg = BotConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.symbol, "BTC-PERP");
        assert_eq!(cfg.account_mode, AccountMode::Live);
        assert!((cfg.margin_usd - 2.5).abs() < f64::EPSILON);
        assert_eq!(cfg.leverage, 5);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let mut cfg = BotConfig::default();
        cfg.hold_min_secs = 120.0;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.stop_loss_usd = 0.05;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.twap_slices = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.close_confirm_budget = 0;
        assert!(cfg.validate().is_err());
    }
}
