// =============================================================================
// TWAP Slicer — sliced market entry with in-place progress reporting
// =============================================================================
//
// The target size is reached with `slices` identical market orders spaced by a
// fixed interval. The slice size is computed once from the price at the start
// of the run, so later price moves never change it. Progress is reported by
// editing one message instead of sending one per slice.
//
// After the last slice the open is confirmed by polling the position a few
// times, with one extended wait before giving up.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::execution::OrderExecutor;
use crate::notify::Notifier;
use crate::position_reader::{Position, PositionReader};
use crate::runtime_config::{secs, BotConfig};
use crate::types::{Direction, LotRule};

/// Quantity of one slice: `(margin × leverage) / price`, capped at
/// `max_size`, then passed through the instrument's lot rule.
///
/// `None` for a non-positive or non-finite price.
pub fn slice_quantity(
    margin_usd: f64,
    leverage: u32,
    price: f64,
    max_size: f64,
    lot_rule: LotRule,
) -> Option<f64> {
    if !(price > 0.0) || !price.is_finite() {
        return None;
    }
    let raw = (margin_usd * f64::from(leverage)) / price;
    Some(lot_rule.apply(raw.min(max_size)))
}

/// Summary of a completed slicing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwapReport {
    pub slice_qty: f64,
    pub slices_sent: u32,
    pub reference_price: f64,
}

impl TwapReport {
    pub fn total_quantity(&self) -> f64 {
        self.slice_qty * f64::from(self.slices_sent)
    }
}

/// Open-confirmation pacing.
#[derive(Debug, Clone)]
pub struct OpenCheckPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub extended_wait: Duration,
}

/// Opens positions in equal slices.
pub struct TwapSlicer {
    executor: OrderExecutor,
    reader: PositionReader,
    notifier: Arc<dyn Notifier>,
    margin_usd: f64,
    leverage: u32,
    max_position_size: f64,
    lot_rule: LotRule,
    slices: u32,
    interval: Duration,
    open_check: OpenCheckPolicy,
}

impl TwapSlicer {
    pub fn new(
        executor: OrderExecutor,
        reader: PositionReader,
        notifier: Arc<dyn Notifier>,
        config: &BotConfig,
    ) -> Self {
        Self {
            executor,
            reader,
            notifier,
            margin_usd: config.margin_usd,
            leverage: config.leverage,
            max_position_size: config.max_position_size,
            lot_rule: config.lot_rule,
            slices: config.twap_slices,
            interval: secs(config.twap_interval_secs),
            open_check: OpenCheckPolicy {
                attempts: config.timings.open_check_attempts,
                interval: secs(config.timings.open_check_interval_secs),
                extended_wait: secs(config.timings.open_extended_wait_secs),
            },
        }
    }

    /// Submit all slices in `direction`, sized from `price`.
    ///
    /// Slices go out strictly one after another; an order failure aborts the
    /// run and propagates.
    pub async fn open_twap(&self, tag: &str, direction: Direction, price: f64) -> Result<TwapReport> {
        let slice_qty = slice_quantity(
            self.margin_usd,
            self.leverage,
            price,
            self.max_position_size,
            self.lot_rule,
        )
        .ok_or_else(|| anyhow::anyhow!("cannot size TWAP slices from price {price}"))?;

        let side = direction.entry_side();
        let total = self.slices;
        info!(tag, %side, slice_qty, slices = total, price, "TWAP entry starting");

        let progress = self
            .notifier
            .notify(&format!("[{tag}] 🚀 TWAP 0/{total} starting..."))
            .await;

        for i in 1..=total {
            self.executor.submit_market(side, slice_qty).await?;

            let text = format!("[{tag}] 🚀 TWAP {i}/{total} filled @ {price:.6}");
            match progress {
                Some(handle) => self.notifier.update(handle, &text).await,
                None => info!(tag, slice = i, slices = total, "{text}"),
            }
            tokio::time::sleep(self.interval).await;
        }

        self.notifier.notify(&format!("[{tag}] 🚀 TWAP complete.")).await;
        info!(tag, slice_qty, slices = total, "TWAP entry complete");

        Ok(TwapReport {
            slice_qty,
            slices_sent: total,
            reference_price: price,
        })
    }

    /// Poll until the position shows up. `None` when it never does.
    pub async fn confirm_open(&self, tag: &str) -> Result<Option<Position>> {
        let attempts = self.open_check.attempts;
        for i in 1..=attempts {
            tokio::time::sleep(self.open_check.interval).await;
            if let Some(pos) = self.reader.read_position().await? {
                self.notifier
                    .notify(&format!("[{tag}] ✅ OPEN check {i}/{attempts}: opened."))
                    .await;
                return Ok(Some(pos));
            }
            self.notifier
                .notify(&format!("[{tag}] ⚠️ OPEN check {i}/{attempts}: not yet."))
                .await;
        }

        self.notifier
            .notify(&format!(
                "[{tag}] ⏳ Final {}s extra check...",
                self.open_check.extended_wait.as_secs()
            ))
            .await;
        tokio::time::sleep(self.open_check.extended_wait).await;

        match self.reader.read_position().await? {
            Some(pos) => {
                self.notifier.notify(&format!("[{tag}] ✅ Opened.")).await;
                Ok(Some(pos))
            }
            None => {
                warn!(tag, "position never materialised after TWAP");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::paper::PaperExchange;
    use crate::testkit::{self, RecordingNotifier, ScriptedExchange, SYMBOL};
    use crate::types::OrderSide;
    use tokio::time::Instant;

    fn slicer_on(
        client: Arc<dyn crate::exchange::ExchangeClient>,
        notifier: &Arc<RecordingNotifier>,
        config: &BotConfig,
    ) -> TwapSlicer {
        TwapSlicer::new(
            OrderExecutor::new(client.clone(), SYMBOL, config.leverage, config.order_ttl_ms),
            PositionReader::new(client, SYMBOL),
            notifier.clone(),
            config,
        )
    }

    #[test]
    fn whole_unit_slices_floor_the_quantity() {
        // margin 1 × leverage 5 / price 2.0 = 2.5 → 2
        assert_eq!(slice_quantity(1.0, 5, 2.0, 100.0, LotRule::WholeUnits), Some(2.0));
        // tiny notional never rounds to zero
        assert_eq!(slice_quantity(1.0, 1, 50.0, 100.0, LotRule::WholeUnits), Some(1.0));
    }

    #[test]
    fn decimal_slices_are_unrounded_and_capped() {
        assert_eq!(slice_quantity(1.0, 5, 2.0, 100.0, LotRule::Decimal), Some(2.5));
        assert_eq!(slice_quantity(100.0, 10, 1.0, 100.0, LotRule::Decimal), Some(100.0));
    }

    #[test]
    fn unusable_price_cannot_be_sliced() {
        assert_eq!(slice_quantity(1.0, 5, 0.0, 100.0, LotRule::Decimal), None);
        assert_eq!(slice_quantity(1.0, 5, -1.0, 100.0, LotRule::Decimal), None);
        assert_eq!(slice_quantity(1.0, 5, f64::NAN, 100.0, LotRule::Decimal), None);
    }

    #[tokio::test(start_paused = true)]
    async fn submits_exactly_n_equal_slices_in_order() {
        let ex = Arc::new(ScriptedExchange::new(vec![]));
        let n = Arc::new(RecordingNotifier::default());
        let config = testkit::config();
        let slicer = slicer_on(ex.clone(), &n, &config);

        let start = Instant::now();
        let report = slicer.open_twap("LONG", Direction::Long, 2.0).await.unwrap();

        let orders = ex.orders();
        assert_eq!(orders.len(), 5);
        assert!(orders.iter().all(|o| o.quantity == 2.0 && o.side == OrderSide::Buy));
        assert_eq!(report.total_quantity(), 10.0);
        assert!(start.elapsed() >= Duration::from_secs(5));

        // One progress message, edited once per slice.
        let edits = n.edits();
        assert_eq!(edits.len(), 5);
        assert!(edits.iter().all(|(h, _)| *h == edits[0].0));
        assert!(edits[4].1.contains("TWAP 5/5"));
        assert!(n.any_sent("TWAP 0/5"));
    }

    #[tokio::test(start_paused = true)]
    async fn volatile_paper_venue_accumulates_full_size() {
        let paper = Arc::new(PaperExchange::new(SYMBOL, 2.0, 100.0).with_volatility(0.05));
        let n = Arc::new(RecordingNotifier::default());
        let config = testkit::config();
        let slicer = slicer_on(paper.clone(), &n, &config);

        slicer.open_twap("SHORT", Direction::Short, 2.0).await.unwrap();

        assert_eq!(paper.orders_filled(), 5);
        assert!((paper.net_quantity() + 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn open_confirmed_on_second_check() {
        let ex = Arc::new(ScriptedExchange::new(vec![testkit::flat(), testkit::long(10.0)]));
        let n = Arc::new(RecordingNotifier::default());
        let slicer = slicer_on(ex.clone(), &n, &testkit::config());

        let start = Instant::now();
        let pos = slicer.confirm_open("LONG").await.unwrap().unwrap();

        assert_eq!(pos.quantity, 10.0);
        assert!(n.any_sent("OPEN check 2/3: opened"));
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn open_confirmed_on_extended_check() {
        let ex = Arc::new(ScriptedExchange::new(vec![
            testkit::flat(),
            testkit::flat(),
            testkit::flat(),
            testkit::long(10.0),
        ]));
        let n = Arc::new(RecordingNotifier::default());
        let slicer = slicer_on(ex.clone(), &n, &testkit::config());

        let pos = slicer.confirm_open("LONG").await.unwrap();

        assert!(pos.is_some());
        assert!(n.any_sent("Final 15s extra check"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_materialised_is_none_after_45s() {
        let ex = Arc::new(ScriptedExchange::new(vec![testkit::flat()]));
        let n = Arc::new(RecordingNotifier::default());
        let slicer = slicer_on(ex.clone(), &n, &testkit::config());

        let start = Instant::now();
        assert!(slicer.confirm_open("LONG").await.unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_secs(45));
        assert!(start.elapsed() < Duration::from_secs(46));
        assert_eq!(ex.reads(), 4);
    }
}
