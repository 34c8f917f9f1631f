// =============================================================================
// Close Protocol — drive the venue position to zero, or escalate
// =============================================================================
//
// State machine (one instance per call, never shared):
//
//   Observing ──none/zero──────────────────────────────────► Closed
//      │ grown > tolerance ───────────────────────────────► Unresolved
//      │ |Δ| ≤ tolerance ──► UnchangedBackoff ──► Observing
//      │ first / shrunk
//      ▼
//   Submitting ──► Verifying ──closed──► Closed
//                     │ still open
//                     ▼
//                  Verifying(forced) ──closed──► Closed
//                     │ still open
//                     ▼
//                  Escalating ──budget left──► Observing
//                     └──budget spent─────────────────────► Unresolved
//
// Both non-terminal loops consume a counter bounded by the confirmation
// budget, so every call terminates after at most 2 × budget observations.
//
// An unchanged size never triggers a new order: the venue may still be
// settling the previous fill. Growth is never auto-remediated.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::execution::OrderExecutor;
use crate::notify::Notifier;
use crate::position_reader::PositionReader;
use crate::runtime_config::{secs, BotConfig};
use crate::types::OrderSide;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why the protocol gave up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UnresolvedReason {
    /// Size grew between two observations.
    AnomalousGrowth { previous: f64, current: f64 },
    /// Still open after `rounds` force-close rounds.
    BudgetExhausted { rounds: u32 },
    /// Size stayed unchanged for `backoffs` consecutive back-offs.
    Stalled { backoffs: u32 },
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnomalousGrowth { previous, current } => {
                write!(f, "position grew {previous:.4} -> {current:.4}")
            }
            Self::BudgetExhausted { rounds } => write!(f, "still open after {rounds} force-close rounds"),
            Self::Stalled { backoffs } => write!(f, "size unchanged after {backoffs} back-offs"),
        }
    }
}

/// Terminal result of one close call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CloseOutcome {
    Closed,
    Unresolved(UnresolvedReason),
}

impl std::fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Unresolved(reason) => write!(f, "Unresolved({reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Size comparison
// ---------------------------------------------------------------------------

/// How an observation compares with the previous one in the same call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeChange {
    First,
    Unchanged,
    Shrunk { previous: f64 },
    Grown { previous: f64 },
}

impl SizeChange {
    /// `|Δ| ≤ tolerance` is unchanged; growth and shrinkage must exceed it.
    pub fn classify(previous: Option<f64>, current: f64, tolerance: f64) -> Self {
        match previous {
            None => Self::First,
            Some(prev) if current > prev + tolerance => Self::Grown { previous: prev },
            Some(prev) if current < prev - tolerance => Self::Shrunk { previous: prev },
            Some(_) => Self::Unchanged,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum CloseState {
    Observing,
    UnchangedBackoff { size: f64 },
    Submitting { size: f64, side: OrderSide },
    Verifying { size: f64, side: OrderSide, forced: bool },
    Escalating,
    Done(CloseOutcome),
}

/// Per-call bookkeeping.
#[derive(Debug, Default)]
struct CloseAttemptState {
    previous_size: Option<f64>,
    not_found_counter: u32,
    stalled_counter: u32,
}

/// Tunables of the protocol, taken from `BotConfig`.
#[derive(Debug, Clone)]
pub struct ClosePolicy {
    pub tolerance: f64,
    pub confirm_budget: u32,
    pub unchanged_backoff: Duration,
    pub settle: Duration,
    pub force_settle: Duration,
}

impl ClosePolicy {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            tolerance: config.anomaly_tolerance,
            confirm_budget: config.close_confirm_budget.max(1),
            unchanged_backoff: secs(config.timings.unchanged_backoff_secs),
            settle: secs(config.timings.close_settle_secs),
            force_settle: secs(config.timings.force_settle_secs),
        }
    }
}

/// Closes whatever position the venue reports for one instrument.
pub struct CloseProtocol {
    reader: PositionReader,
    executor: OrderExecutor,
    notifier: Arc<dyn Notifier>,
    policy: ClosePolicy,
}

impl CloseProtocol {
    pub fn new(
        reader: PositionReader,
        executor: OrderExecutor,
        notifier: Arc<dyn Notifier>,
        policy: ClosePolicy,
    ) -> Self {
        Self {
            reader,
            executor,
            notifier,
            policy,
        }
    }

    /// Run the protocol until the position is gone or the call escalates.
    ///
    /// Exchange and order errors propagate; the caller's failure envelope
    /// handles them.
    pub async fn close_position(&self, tag: &str) -> Result<CloseOutcome> {
        let mut attempt = CloseAttemptState::default();
        let mut state = CloseState::Observing;

        loop {
            debug!(tag, state = ?state, "close protocol step");
            state = match state {
                CloseState::Done(outcome) => {
                    info!(tag, symbol = %self.reader.symbol(), outcome = %outcome, "close protocol finished");
                    return Ok(outcome);
                }
                CloseState::Observing => self.observe(tag, &mut attempt).await?,
                CloseState::UnchangedBackoff { size } => {
                    attempt.stalled_counter += 1;
                    if attempt.stalled_counter >= self.policy.confirm_budget {
                        error!(tag, size, backoffs = attempt.stalled_counter, "position size stuck, escalating");
                        self.notifier
                            .notify(&format!(
                                "[{tag}] 🚨 Position stuck at {size:.4} after {} checks. Manual check required!",
                                attempt.stalled_counter
                            ))
                            .await;
                        CloseState::Done(CloseOutcome::Unresolved(UnresolvedReason::Stalled {
                            backoffs: attempt.stalled_counter,
                        }))
                    } else {
                        self.notifier
                            .notify(&format!(
                                "[{tag}] ⏳ Position unchanged ({size:.4}), waiting {}s…",
                                self.policy.unchanged_backoff.as_secs()
                            ))
                            .await;
                        tokio::time::sleep(self.policy.unchanged_backoff).await;
                        CloseState::Observing
                    }
                }
                CloseState::Submitting { size, side } => {
                    self.notifier
                        .notify(&format!("[{tag}] ⚠️ Closing position… (size={size:.4})"))
                        .await;
                    self.executor.submit_market(side, size).await?;
                    tokio::time::sleep(self.policy.settle).await;
                    CloseState::Verifying { size, side, forced: false }
                }
                CloseState::Verifying { size, side, forced } => {
                    if self.reader.read_position().await?.is_none() {
                        let msg = if forced {
                            format!("[{tag}] ✔️ Force-close: position CLOSED.")
                        } else {
                            format!("[{tag}] ✔️ Position closed.")
                        };
                        self.notifier.notify(&msg).await;
                        CloseState::Done(CloseOutcome::Closed)
                    } else if !forced {
                        warn!(tag, size, "position still open after close, force-closing");
                        self.notifier.notify(&format!("[{tag}] 🔒 Force-close…")).await;
                        self.executor.submit_market(side, size).await?;
                        tokio::time::sleep(self.policy.force_settle).await;
                        CloseState::Verifying { size, side, forced: true }
                    } else {
                        CloseState::Escalating
                    }
                }
                CloseState::Escalating => {
                    attempt.not_found_counter += 1;
                    let budget = self.policy.confirm_budget;
                    warn!(tag, round = attempt.not_found_counter, budget, "position still open after force-close");
                    self.notifier
                        .notify(&format!(
                            "[{tag}] ❗️ Still open. ({}/{budget})",
                            attempt.not_found_counter
                        ))
                        .await;
                    if attempt.not_found_counter >= budget {
                        error!(tag, rounds = attempt.not_found_counter, "close budget exhausted, manual intervention required");
                        self.notifier
                            .notify(&format!("[{tag}] 🚨 Close failed, manual check required!"))
                            .await;
                        CloseState::Done(CloseOutcome::Unresolved(UnresolvedReason::BudgetExhausted {
                            rounds: attempt.not_found_counter,
                        }))
                    } else {
                        CloseState::Observing
                    }
                }
            };
        }
    }

    async fn observe(&self, tag: &str, attempt: &mut CloseAttemptState) -> Result<CloseState> {
        let Some(pos) = self.reader.read_position().await? else {
            self.notifier
                .notify(&format!("[{tag}] ✔️ No open position for {}.", self.reader.symbol()))
                .await;
            return Ok(CloseState::Done(CloseOutcome::Closed));
        };

        let size = pos.quantity;
        let next = match SizeChange::classify(attempt.previous_size, size, self.policy.tolerance) {
            SizeChange::Grown { previous } => {
                error!(tag, previous, current = size, "position grew during close, halting auto-close");
                self.notifier
                    .notify(&format!(
                        "[{tag}] 🚨 POSITION GREW UNEXPECTEDLY! ({previous:.4} → {size:.4})\nAuto-close halted. Check manually."
                    ))
                    .await;
                return Ok(CloseState::Done(CloseOutcome::Unresolved(
                    UnresolvedReason::AnomalousGrowth { previous, current: size },
                )));
            }
            SizeChange::Unchanged => return Ok(CloseState::UnchangedBackoff { size }),
            SizeChange::Shrunk { previous } => {
                info!(tag, previous, current = size, "position shrank, closing remainder");
                self.notifier
                    .notify(&format!(
                        "[{tag}] 🔄 Position shrank ({previous:.4} → {size:.4}). Closing remainder…"
                    ))
                    .await;
                CloseState::Submitting { size, side: pos.side.exit_side() }
            }
            SizeChange::First => CloseState::Submitting { size, side: pos.side.exit_side() },
        };

        attempt.previous_size = Some(size);
        Ok(next)
    }
}
