// =============================================================================
// TWAP Cycler — Main Entry Point
// =============================================================================
//
// The bot starts in Paper mode unless BOT_ACCOUNT_MODE=live. Live mode needs
// exchange credentials in the environment; chat credentials are optional and
// fall back to log-only notifications.
//
// Cycles run strictly one after another. Ctrl+C is honoured between cycles so
// an open position is never abandoned half-way.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod close_protocol;
mod exchange;
mod execution;
mod fixed_point;
mod lifecycle;
mod market;
mod notify;
mod position_reader;
mod risk_monitor;
mod runtime_config;
mod twap;
mod types;

#[cfg(test)]
mod testkit;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::exchange::client::{RestExchangeClient, DEFAULT_BASE_URL};
use crate::exchange::paper::PaperExchange;
use crate::exchange::ExchangeClient;
use crate::lifecycle::{CycleOutcome, LifecycleCoordinator};
use crate::notify::telegram::TelegramNotifier;
use crate::notify::{LogNotifier, Notifier};
use crate::runtime_config::BotConfig;
use crate::types::{AccountMode, Direction};

/// Simulated wallet used by the paper venue.
const PAPER_WALLET_USD: f64 = 1_000.0;

/// Non-empty environment variable.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn build_client(config: &BotConfig) -> Result<Arc<dyn ExchangeClient>> {
    match config.account_mode {
        AccountMode::Paper => {
            info!(symbol = %config.symbol, start_price = config.paper_start_price, "using paper exchange");
            Ok(Arc::new(PaperExchange::new(
                config.symbol.clone(),
                config.paper_start_price,
                PAPER_WALLET_USD,
            )))
        }
        AccountMode::Live => {
            let api_key = env_var("EXCHANGE_API_KEY").context("EXCHANGE_API_KEY is required in live mode")?;
            let secret =
                env_var("EXCHANGE_API_SECRET").context("EXCHANGE_API_SECRET is required in live mode")?;
            let account = env_var("EXCHANGE_ACCOUNT").context("EXCHANGE_ACCOUNT is required in live mode")?;
            let base_url = env_var("EXCHANGE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
            warn!(symbol = %config.symbol, base_url = %base_url, "LIVE trading enabled");
            Ok(Arc::new(RestExchangeClient::new(api_key, secret, account, base_url)?))
        }
    }
}

fn build_notifier() -> Arc<dyn Notifier> {
    match (env_var("TELEGRAM_BOT_TOKEN"), env_var("TELEGRAM_CHAT_ID")) {
        (Some(token), Some(chat_id)) => match TelegramNotifier::new(&token, &chat_id) {
            Ok(notifier) => {
                info!("telegram notifications enabled");
                Arc::new(notifier)
            }
            Err(e) => {
                warn!(error = %e, "telegram notifier unavailable, logging notifications only");
                Arc::new(LogNotifier::new())
            }
        },
        _ => {
            info!("no telegram credentials, logging notifications only");
            Arc::new(LogNotifier::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              TWAP Cycler: Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = env_var("BOT_CONFIG").unwrap_or_else(|| "bot_config.json".to_string());
    let mut config = BotConfig::load_or_init(&config_path)
        .with_context(|| format!("failed to load bot config from {config_path}"))?;
    config.apply_overrides(env_var);
    config.validate().context("invalid bot configuration")?;

    info!(
        symbol = %config.symbol,
        account_mode = %config.account_mode,
        margin_usd = config.margin_usd,
        leverage = config.leverage,
        slices = config.twap_slices,
        "configuration ready"
    );

    // ── 2. Venue & notifications ─────────────────────────────────────────
    let client = build_client(&config)?;
    let notifier = build_notifier();
    let config = Arc::new(config);
    let coordinator = LifecycleCoordinator::new(config.clone(), client, notifier.clone());

    notifier
        .notify(&format!(
            "🤖 Bot started | {} | {} | margin ${} x{}",
            config.symbol, config.account_mode, config.margin_usd, config.leverage
        ))
        .await;

    // ── 3. Shutdown flag ─────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Shutdown signal received, stopping after the current cycle");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    // ── 4. Cycle loop ────────────────────────────────────────────────────
    let mut cycles: u64 = 0;
    while !shutdown.load(Ordering::SeqCst) {
        let direction = if rand::random::<bool>() {
            Direction::Long
        } else {
            Direction::Short
        };
        let tag = direction.to_string();

        cycles += 1;
        let report = coordinator.run_cycle(direction, &tag).await;
        match &report.outcome {
            CycleOutcome::Completed { .. } => info!(
                cycle = cycles,
                cycle_id = %report.id,
                tag = %report.tag,
                direction = %report.direction,
                started_at = %report.started_at,
                duration_secs = report.duration.as_secs_f64(),
                outcome = %report.outcome,
                "cycle complete"
            ),
            CycleOutcome::Aborted(_) | CycleOutcome::Failed(_) => warn!(
                cycle = cycles,
                cycle_id = %report.id,
                tag = %report.tag,
                direction = %report.direction,
                started_at = %report.started_at,
                duration_secs = report.duration.as_secs_f64(),
                outcome = %report.outcome,
                "cycle did not complete"
            ),
        }
    }

    notifier
        .notify(&format!("🛑 Bot stopped after {cycles} cycles."))
        .await;
    info!(cycles, "TWAP Cycler shut down complete.");
    Ok(())
}
