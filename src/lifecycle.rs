// =============================================================================
// Lifecycle Coordinator — one directional trade, start to finish
// =============================================================================
//
// Sequence of a cycle:
//   1. Report wallet balance.
//   2. Close Protocol: clear any stale position (abort if unresolved).
//   3. Fetch price (abort if unavailable).
//   4. TWAP entry.
//   5. Open confirmation (abort if the position never shows up).
//   6. Entry snapshot (entry price + size, frozen for the cycle).
//   7. Risk Monitor hold.
//   8. Exit sequence: `close_retries` plain attempts, then one forced attempt.
//   9. Report duration, sleep a randomized inter-cycle delay.
//
// Failure envelope: any error raised inside the cycle is caught in
// `run_cycle`, reported, and followed by a short cooldown. The caller's loop
// keeps going; a single bad cycle never stops the process.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::close_protocol::{CloseOutcome, ClosePolicy, CloseProtocol, UnresolvedReason};
use crate::exchange::ExchangeClient;
use crate::execution::OrderExecutor;
use crate::market::{fetch_price, fetch_wallet_balance};
use crate::notify::Notifier;
use crate::position_reader::PositionReader;
use crate::risk_monitor::{HoldExit, RiskMonitor};
use crate::runtime_config::{secs, BotConfig};
use crate::twap::TwapSlicer;
use crate::types::{Direction, OrderSide};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of the post-hold exit sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExitOutcome {
    /// Confirmed flat after the given ordinary attempt (1-based).
    Closed { attempt: u32 },
    /// Confirmed flat only after the extra forced attempt.
    ForceClosed,
    /// Still open after every attempt. Needs an operator.
    Unresolved,
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed { attempt } => write!(f, "Closed(attempt {attempt})"),
            Self::ForceClosed => write!(f, "ForceClosed"),
            Self::Unresolved => write!(f, "Unresolved"),
        }
    }
}

/// Why a cycle stopped before holding a position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AbortReason {
    StaleUnresolved(UnresolvedReason),
    NoPrice,
    OpenNotConfirmed,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleUnresolved(r) => write!(f, "stale position unresolved: {r}"),
            Self::NoPrice => write!(f, "price unavailable"),
            Self::OpenNotConfirmed => write!(f, "open not confirmed"),
        }
    }
}

/// Final state of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CycleOutcome {
    Completed { hold: HoldExit, exit: ExitOutcome },
    Aborted(AbortReason),
    Failed(String),
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed { hold, exit } => write!(f, "Completed({}, {exit})", hold.reason),
            Self::Aborted(reason) => write!(f, "Aborted({reason})"),
            Self::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

/// What the driver gets back from one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub id: Uuid,
    pub tag: String,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: CycleOutcome,
}

/// Frozen facts of an opened cycle.
#[derive(Debug, Clone, PartialEq)]
struct TradeCycle {
    direction: Direction,
    entry_price: f64,
    position_size: f64,
    hold_duration: Duration,
}

/// Uniform draw in `[min, max]` seconds.
fn uniform_secs(min: f64, max: f64) -> Duration {
    if max <= min {
        return secs(min);
    }
    secs(rand::thread_rng().gen_range(min..=max))
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Runs trade cycles for one instrument. Cycles must not overlap.
pub struct LifecycleCoordinator {
    config: Arc<BotConfig>,
    client: Arc<dyn ExchangeClient>,
    notifier: Arc<dyn Notifier>,
    reader: PositionReader,
    executor: OrderExecutor,
    closer: CloseProtocol,
    twap: TwapSlicer,
    monitor: RiskMonitor,
}

impl LifecycleCoordinator {
    /// Wire all components for `config.symbol`.
    pub fn new(
        config: Arc<BotConfig>,
        client: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let reader = PositionReader::new(client.clone(), config.symbol.clone());
        let executor = OrderExecutor::new(
            client.clone(),
            config.symbol.clone(),
            config.leverage,
            config.order_ttl_ms,
        );
        let closer = CloseProtocol::new(
            reader.clone(),
            executor.clone(),
            notifier.clone(),
            ClosePolicy::from_config(&config),
        );
        let twap = TwapSlicer::new(executor.clone(), reader.clone(), notifier.clone(), &config);
        let monitor = RiskMonitor::new(reader.clone(), notifier.clone(), &config);

        Self {
            config,
            client,
            notifier,
            reader,
            executor,
            closer,
            twap,
            monitor,
        }
    }

    /// Run one full cycle inside the failure envelope. Never returns an error.
    pub async fn run_cycle(&self, direction: Direction, tag: &str) -> CycleReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(cycle_id = %id, tag, direction = %direction, symbol = %self.config.symbol, "cycle started");

        let outcome = match self.try_cycle(direction, tag).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(cycle_id = %id, tag, error = %format!("{e:#}"), "cycle failed");
                self.notifier
                    .notify(&format!("[{tag}] 🚨 ERROR: {e:#}. Continuing."))
                    .await;
                tokio::time::sleep(secs(self.config.timings.error_cooldown_secs)).await;
                CycleOutcome::Failed(format!("{e:#}"))
            }
        };

        match &outcome {
            CycleOutcome::Completed { .. } => {
                // Measured from cycle start: stale close, entry and hold included.
                let total = clock.elapsed();
                let next = uniform_secs(self.config.wait_min_secs, self.config.wait_max_secs);
                self.notifier
                    .notify(&format!(
                        "[{tag}] ✅ DONE | Cycle duration: {:.1}min | Next: {:.1}s",
                        total.as_secs_f64() / 60.0,
                        next.as_secs_f64()
                    ))
                    .await;
                tokio::time::sleep(next).await;
            }
            CycleOutcome::Aborted(reason) => {
                warn!(cycle_id = %id, tag, reason = %reason, "cycle aborted");
                tokio::time::sleep(secs(self.config.timings.error_cooldown_secs)).await;
            }
            CycleOutcome::Failed(_) => {}
        }

        let duration = clock.elapsed();
        info!(
            cycle_id = %id,
            tag,
            outcome = %outcome,
            duration_secs = duration.as_secs_f64(),
            "cycle finished"
        );

        CycleReport {
            id,
            tag: tag.to_string(),
            direction,
            started_at,
            duration,
            outcome,
        }
    }

    async fn try_cycle(&self, direction: Direction, tag: &str) -> Result<CycleOutcome> {
        // ── 1. Balance ─────────────────────────────────────────────────────
        match fetch_wallet_balance(self.client.as_ref()).await? {
            Some(balance) => {
                info!(tag, balance, "wallet balance");
                self.notifier
                    .notify(&format!("💼 Wallet Balance: {balance:.4} USDC"))
                    .await;
            }
            None => {
                self.notifier.notify("💼 Balance unavailable").await;
            }
        }

        // ── 2. Stale position ──────────────────────────────────────────────
        if let CloseOutcome::Unresolved(reason) =
            self.closer.close_position(tag).await?
        {
            self.notifier
                .notify(&format!("[{tag}] 🚨 Stale position not cleared ({reason}); skipping entry."))
                .await;
            return Ok(CycleOutcome::Aborted(AbortReason::StaleUnresolved(reason)));
        }

        // ── 3. Price ───────────────────────────────────────────────────────
        let Some(price) = fetch_price(self.client.as_ref(), &self.config.symbol).await? else {
            self.notifier
                .notify(&format!("[{tag}] ❌ Price unavailable, skipping."))
                .await;
            return Ok(CycleOutcome::Aborted(AbortReason::NoPrice));
        };

        // ── 4. TWAP entry ──────────────────────────────────────────────────
        let entry = self.twap.open_twap(tag, direction, price).await?;
        info!(
            tag,
            slice_qty = entry.slice_qty,
            total_qty = entry.total_quantity(),
            reference_price = entry.reference_price,
            "entry slices sent"
        );

        // ── 5. Open confirmation ───────────────────────────────────────────
        let Some(opened) = self.twap.confirm_open(tag).await? else {
            self.notifier
                .notify(&format!("[{tag}] ❌ Not opened, skipping."))
                .await;
            return Ok(CycleOutcome::Aborted(AbortReason::OpenNotConfirmed));
        };

        // ── 6. Entry snapshot ──────────────────────────────────────────────
        let cycle = TradeCycle {
            direction,
            entry_price: opened.avg_entry_price,
            position_size: opened.quantity,
            hold_duration: uniform_secs(self.config.hold_min_secs, self.config.hold_max_secs),
        };
        if opened.side != direction {
            warn!(tag, expected = %direction, reported = %opened.side, "venue reports opposite side");
        }

        // ── 7. Hold ────────────────────────────────────────────────────────
        let hold = self
            .monitor
            .hold_and_monitor(tag, cycle.entry_price, cycle.position_size, cycle.hold_duration)
            .await;

        // ── 8. Exit ────────────────────────────────────────────────────────
        let exit = self
            .exit_position(tag, cycle.direction.exit_side(), cycle.position_size)
            .await?;

        Ok(CycleOutcome::Completed { hold, exit })
    }

    /// Post-hold exit: `close_retries` attempts, each followed by a settle
    /// wait and an existence check, then one forced extra attempt.
    pub async fn exit_position(&self, tag: &str, side: OrderSide, size: f64) -> Result<ExitOutcome> {
        let settle = secs(self.config.timings.exit_settle_secs);
        let retries = self.config.close_retries;

        for attempt in 1..=retries {
            self.notifier
                .notify(&format!("[{tag}] 🔄 CLOSE attempt {attempt}"))
                .await;
            self.executor.submit_market(side, size).await?;
            tokio::time::sleep(settle).await;

            if self.reader.read_position().await?.is_none() {
                self.notifier.notify(&format!("[{tag}] ✅ Closed.")).await;
                info!(tag, attempt, "exit confirmed");
                return Ok(ExitOutcome::Closed { attempt });
            }
            warn!(tag, attempt, "position still open after exit attempt");
            self.notifier
                .notify(&format!("[{tag}] ⚠️ Still open (try {attempt})."))
                .await;
        }

        self.notifier.notify(&format!("[{tag}] 🔒 Force-close…")).await;
        self.executor.submit_market(side, size).await?;
        tokio::time::sleep(settle).await;

        if self.reader.read_position().await?.is_none() {
            self.notifier
                .notify(&format!("[{tag}] ✔️ Force-close: CLOSED."))
                .await;
            Ok(ExitOutcome::ForceClosed)
        } else {
            error!(tag, size, "exit unresolved, manual intervention required");
            self.notifier
                .notify(&format!("[{tag}] 🚨 Manual check required!"))
                .await;
            Ok(ExitOutcome::Unresolved)
        }
    }
}
