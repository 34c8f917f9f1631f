// =============================================================================
// Risk Monitor — hold the position until time, stop-loss or take-profit
// =============================================================================
//
// Exit checks, in this fixed order on every poll:
//   1. Elapsed hold time ≥ hold duration   -> Timeout
//   2. Unrealised PnL ≤ stop-loss          -> StopLoss
//   3. Unrealised PnL ≥ take-profit        -> TakeProfit
//
// A simultaneous SL/TP breach therefore resolves as StopLoss. Entry price and
// size are frozen at open time and only used for the status message.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::notify::{MessageHandle, Notifier};
use crate::position_reader::PositionReader;
use crate::runtime_config::{secs, BotConfig};

/// Why the hold phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    Timeout,
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timeout"),
            Self::StopLoss => write!(f, "StopLoss"),
            Self::TakeProfit => write!(f, "TakeProfit"),
        }
    }
}

/// Exit decision for one poll. `None` keeps holding.
pub fn evaluate_exit(
    elapsed: Duration,
    hold: Duration,
    pnl: f64,
    stop_loss: f64,
    take_profit: f64,
) -> Option<ExitReason> {
    if elapsed >= hold {
        Some(ExitReason::Timeout)
    } else if pnl <= stop_loss {
        Some(ExitReason::StopLoss)
    } else if pnl >= take_profit {
        Some(ExitReason::TakeProfit)
    } else {
        None
    }
}

/// Result of a completed hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldExit {
    pub reason: ExitReason,
    /// PnL observed on the deciding poll (last read PnL for timeouts).
    pub pnl: f64,
    pub elapsed: Duration,
    pub polls: u32,
}

/// Polls PnL and hold time for one open position.
pub struct RiskMonitor {
    reader: PositionReader,
    notifier: Arc<dyn Notifier>,
    stop_loss: f64,
    take_profit: f64,
    poll: Duration,
    status_interval: Duration,
}

impl RiskMonitor {
    pub fn new(reader: PositionReader, notifier: Arc<dyn Notifier>, config: &BotConfig) -> Self {
        Self {
            reader,
            notifier,
            stop_loss: config.stop_loss_usd,
            take_profit: config.take_profit_usd,
            poll: secs(config.timings.monitor_poll_secs),
            status_interval: secs(config.timings.status_interval_secs),
        }
    }

    fn status_text(tag: &str, entry: f64, size: f64, pnl: f64, elapsed: Duration) -> String {
        format!(
            "[{tag}] Status\nEntry: {entry:.6}\nSize : {size:.6}\nPnL  : {pnl:.4}\nTime : {}s",
            elapsed.as_secs()
        )
    }

    /// Hold until the first exit condition. Never fails: an unreadable
    /// position counts as zero PnL.
    pub async fn hold_and_monitor(
        &self,
        tag: &str,
        entry_price: f64,
        position_size: f64,
        hold: Duration,
    ) -> HoldExit {
        let status = self
            .notifier
            .notify(&Self::status_text(tag, entry_price, position_size, 0.0, Duration::ZERO))
            .await;
        self.notifier
            .notify(&format!(
                "[{tag}] ⏱ Hold ~{:.1}min; SL={}, TP={}",
                hold.as_secs_f64() / 60.0,
                self.stop_loss,
                self.take_profit
            ))
            .await;
        info!(tag, entry_price, position_size, hold_secs = hold.as_secs_f64(), "hold started");

        let start = Instant::now();
        let mut last_status: Option<Instant> = None;
        let mut last_pnl = 0.0;
        let mut polls = 0u32;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= hold {
                self.notifier.notify(&format!("[{tag}] ⌛ Hold time over.")).await;
                return self.finish(tag, ExitReason::Timeout, last_pnl, elapsed, polls);
            }

            polls += 1;
            let pnl = match self.reader.read_position().await {
                Ok(Some(pos)) => pos.unrealized_profit,
                Ok(None) => 0.0,
                Err(e) => {
                    warn!(tag, error = %e, "PnL read failed, treating as 0");
                    0.0
                }
            };
            last_pnl = pnl;

            if let Some(handle) = status {
                self.maybe_update_status(handle, &mut last_status, tag, entry_price, position_size, pnl, elapsed)
                    .await;
            }

            match evaluate_exit(elapsed, hold, pnl, self.stop_loss, self.take_profit) {
                Some(ExitReason::StopLoss) => {
                    self.notifier.notify(&format!("[{tag}] ⚡️ SL (PnL={pnl:.4})")).await;
                    return self.finish(tag, ExitReason::StopLoss, pnl, elapsed, polls);
                }
                Some(ExitReason::TakeProfit) => {
                    self.notifier.notify(&format!("[{tag}] 🎯 TP (PnL={pnl:.4})")).await;
                    return self.finish(tag, ExitReason::TakeProfit, pnl, elapsed, polls);
                }
                _ => debug!(tag, pnl, elapsed_secs = elapsed.as_secs(), "holding"),
            }

            tokio::time::sleep(self.poll).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn maybe_update_status(
        &self,
        handle: MessageHandle,
        last_status: &mut Option<Instant>,
        tag: &str,
        entry: f64,
        size: f64,
        pnl: f64,
        elapsed: Duration,
    ) {
        let due = last_status.map_or(true, |t| t.elapsed() >= self.status_interval);
        if due {
            self.notifier
                .update(handle, &Self::status_text(tag, entry, size, pnl, elapsed))
                .await;
            *last_status = Some(Instant::now());
        }
    }

    fn finish(&self, tag: &str, reason: ExitReason, pnl: f64, elapsed: Duration, polls: u32) -> HoldExit {
        info!(tag, reason = %reason, pnl, elapsed_secs = elapsed.as_secs_f64(), polls, "hold finished");
        HoldExit {
            reason,
            pnl,
            elapsed,
            polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, RecordingNotifier, ScriptedExchange, SYMBOL};

    fn monitor(ex: &Arc<ScriptedExchange>, n: &Arc<RecordingNotifier>) -> RiskMonitor {
        RiskMonitor::new(PositionReader::new(ex.clone(), SYMBOL), n.clone(), &testkit::config())
    }

    fn pnl(value: f64) -> serde_json::Value {
        testkit::position("BUY", 10.0, 2.0, value)
    }

    #[test]
    fn exit_order_is_time_then_sl_then_tp() {
        let hold = Duration::from_secs(60);
        let early = Duration::from_secs(5);
        assert_eq!(evaluate_exit(hold, hold, 1.0, -0.05, 0.09), Some(ExitReason::Timeout));
        assert_eq!(evaluate_exit(early, hold, -0.05, -0.05, 0.09), Some(ExitReason::StopLoss));
        assert_eq!(evaluate_exit(early, hold, 0.09, -0.05, 0.09), Some(ExitReason::TakeProfit));
        assert_eq!(evaluate_exit(early, hold, 0.0, -0.05, 0.09), None);
        // Both breachable (inverted thresholds): stop-loss wins.
        assert_eq!(evaluate_exit(early, hold, 0.0, 0.1, -0.1), Some(ExitReason::StopLoss));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_loss_hits_on_third_poll() {
        let ex = Arc::new(ScriptedExchange::new(vec![pnl(0.0), pnl(-0.02), pnl(-0.06)]));
        let n = Arc::new(RecordingNotifier::default());

        let exit = monitor(&ex, &n)
            .hold_and_monitor("LONG", 2.0, 10.0, Duration::from_secs(60))
            .await;

        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.polls, 3);
        assert!(exit.pnl <= -0.05);
        assert!(n.any_sent("SL (PnL=-0.0600)"));
    }

    #[tokio::test(start_paused = true)]
    async fn take_profit_exits_with_breaching_pnl() {
        let ex = Arc::new(ScriptedExchange::new(vec![pnl(0.01), pnl(0.12)]));
        let n = Arc::new(RecordingNotifier::default());

        let exit = monitor(&ex, &n)
            .hold_and_monitor("LONG", 2.0, 10.0, Duration::from_secs(60))
            .await;

        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert!(exit.pnl >= 0.09);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_market_times_out_at_hold_duration() {
        let ex = Arc::new(ScriptedExchange::new(vec![pnl(0.01)]));
        let n = Arc::new(RecordingNotifier::default());

        let exit = monitor(&ex, &n)
            .hold_and_monitor("LONG", 2.0, 10.0, Duration::from_secs(30))
            .await;

        assert_eq!(exit.reason, ExitReason::Timeout);
        assert!(exit.elapsed >= Duration::from_secs(30));
        assert!(exit.elapsed < Duration::from_secs(32));
        // Status edited on the first poll and then at most every 10s.
        let edits = n.edits();
        assert!((3..=4).contains(&edits.len()), "edits: {}", edits.len());
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_position_counts_as_zero_pnl() {
        let ex = Arc::new(ScriptedExchange::new(vec![testkit::flat()]));
        let n = Arc::new(RecordingNotifier::default());

        let exit = monitor(&ex, &n)
            .hold_and_monitor("LONG", 2.0, 10.0, Duration::from_secs(5))
            .await;

        assert_eq!(exit.reason, ExitReason::Timeout);
        assert_eq!(exit.pnl, 0.0);
    }
}
