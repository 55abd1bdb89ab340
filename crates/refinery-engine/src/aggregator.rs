//! Builds OHLC bars per `(tenant, instrument, interval)` and maintains
//! forward-curve tables from enriched ticks and curve-update events.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use refinery_core::{
    BuiltCurve, CurveId, CurveUpdate, EnrichedTick, InstrumentId, Interval, TenantId, WindowKey,
    WindowState,
};
use refinery_traits::{BarStore, CurveStore};

use crate::error::PipelineError;

/// What happened to the window a tick landed in.
pub enum FoldOutcome {
    /// Folded into an open (or newly opened) window.
    Folded,
    /// The tick landed in a window that already closed but is within the
    /// late-arrival lookback; the recomputed bar carries a bumped revision
    /// and should be re-emitted.
    Revised(refinery_core::Bar),
    /// The tick landed past the late-arrival lookback; accepted to silver
    /// but not folded into any bar.
    TooLateToFold,
}

/// Everything that resulted from folding one tick: the fold outcome for each
/// enabled interval, plus any windows (for this tick's `(tenant,
/// instrument)`) that crossed their close threshold as the watermark advanced.
pub struct TickResult {
    /// Per-interval fold outcome.
    pub folds: Vec<(Interval, FoldOutcome)>,
    /// Bars for windows that closed as a side effect of this tick's watermark advance.
    pub closed: Vec<refinery_core::Bar>,
}

#[derive(Default)]
struct WatermarkTracker {
    watermarks: HashMap<(TenantId, InstrumentId), DateTime<Utc>>,
}

impl WatermarkTracker {
    fn advance(
        &mut self,
        key: &(TenantId, InstrumentId),
        event_time: DateTime<Utc>,
        max_out_of_order: chrono::Duration,
    ) -> DateTime<Utc> {
        let candidate = event_time - max_out_of_order;
        let entry = self.watermarks.entry(key.clone()).or_insert(candidate);
        if candidate > *entry {
            *entry = candidate;
        }
        *entry
    }

    fn current(&self, key: &(TenantId, InstrumentId)) -> Option<DateTime<Utc>> {
        self.watermarks.get(key).copied()
    }
}

/// A closed window retained just long enough to support late-arrival
/// recompute within the configured lookback.
struct ClosedWindow {
    state: WindowState,
    closed_at_watermark: DateTime<Utc>,
}

/// Aggregates enriched ticks into bars and curve updates into built curves.
pub struct Aggregator {
    intervals: Vec<Interval>,
    max_out_of_order: chrono::Duration,
    grace: chrono::Duration,
    late_lookback: chrono::Duration,
    open_windows: HashMap<WindowKey, WindowState>,
    closed_windows: HashMap<WindowKey, ClosedWindow>,
    watermarks: WatermarkTracker,
    curves: HashMap<CurveId, BuiltCurve>,
}

impl Aggregator {
    /// Builds an aggregator for the given enabled intervals and timing config.
    pub fn new(intervals: Vec<Interval>, max_out_of_order_ms: i64, late_lookback_ms: i64, grace_ms: i64) -> Self {
        Self {
            intervals,
            max_out_of_order: chrono::Duration::milliseconds(max_out_of_order_ms),
            grace: chrono::Duration::milliseconds(grace_ms),
            late_lookback: chrono::Duration::milliseconds(late_lookback_ms),
            open_windows: HashMap::new(),
            closed_windows: HashMap::new(),
            watermarks: WatermarkTracker::default(),
            curves: HashMap::new(),
        }
    }

    /// Number of windows currently open, for the `refinery_open_windows` gauge.
    pub fn open_window_count(&self) -> usize {
        self.open_windows.len()
    }

    /// Current watermark for a `(tenant, instrument)` pair, if any tick has been observed.
    pub fn watermark_for(&self, tenant_id: &TenantId, instrument_id: &InstrumentId) -> Option<DateTime<Utc>> {
        self.watermarks.current(&(tenant_id.clone(), instrument_id.clone()))
    }

    /// Folds one enriched tick into every enabled interval's window, then
    /// sweeps for any windows of this tick's `(tenant, instrument)` that
    /// became eligible to close as the watermark advanced.
    pub fn on_tick(&mut self, tick: &EnrichedTick) -> TickResult {
        let tenant_instrument = (tick.tick.tenant_id.clone(), tick.tick.instrument_id.clone());
        let watermark = self
            .watermarks
            .advance(&tenant_instrument, tick.tick.event_time, self.max_out_of_order);

        let intervals = self.intervals.clone();
        let folds = intervals
            .into_iter()
            .map(|interval| {
                let key = WindowKey::for_tick(tick, interval);
                let outcome = self.fold_into(&key, tick, watermark);
                (interval, outcome)
            })
            .collect();

        let closed = self.close_eligible(&tenant_instrument, watermark);

        TickResult { folds, closed }
    }

    fn fold_into(&mut self, key: &WindowKey, tick: &EnrichedTick, watermark: DateTime<Utc>) -> FoldOutcome {
        if let Some(open) = self.open_windows.get_mut(key) {
            open.fold(tick);
            return FoldOutcome::Folded;
        }

        if let Some(closed) = self.closed_windows.get_mut(key) {
            if watermark - closed.closed_at_watermark <= self.late_lookback {
                closed.state.fold(tick);
                closed.state.bump_revision();
                return FoldOutcome::Revised(closed.state.to_bar());
            }
            return FoldOutcome::TooLateToFold;
        }

        if watermark >= key.window_end() + self.grace {
            // This window's entire lifetime already passed the watermark;
            // there is nothing open to recompute against.
            return FoldOutcome::TooLateToFold;
        }

        self.open_windows.insert(key.clone(), WindowState::new(key.clone(), tick));
        FoldOutcome::Folded
    }

    /// Closes every open window for `tenant_instrument` whose `window_end +
    /// grace` has passed the current watermark, moving it into the
    /// late-lookback-eligible closed set and returning its bar.
    fn close_eligible(&mut self, tenant_instrument: &(TenantId, InstrumentId), watermark: DateTime<Utc>) -> Vec<refinery_core::Bar> {
        let due: Vec<WindowKey> = self
            .open_windows
            .keys()
            .filter(|k| {
                &(k.tenant_id.clone(), k.instrument_id.clone()) == tenant_instrument
                    && watermark >= k.window_end() + self.grace
            })
            .cloned()
            .collect();

        due.into_iter()
            .map(|key| {
                let state = self.open_windows.remove(&key).unwrap();
                let bar = state.to_bar();
                self.closed_windows.insert(
                    key,
                    ClosedWindow {
                        state,
                        closed_at_watermark: watermark,
                    },
                );
                bar
            })
            .collect()
    }

    /// Applies a curve update — whether received externally on
    /// `pricing.curve.updates.v1` or synthesized internally from bar data —
    /// through the single entry point both paths share.
    pub fn on_curve_update(&mut self, update: &CurveUpdate) -> BuiltCurve {
        let curve = self
            .curves
            .entry(update.curve_id.clone())
            .or_insert_with(|| BuiltCurve::new(update.curve_id.clone(), update.as_of_date));
        curve.apply_update(update);
        curve.clone()
    }
}

/// Persists a closed/revised bar, wiring the aggregator's pure folding logic
/// to the analytical store.
pub async fn persist_bar(bars: &Arc<dyn BarStore>, bar: &refinery_core::Bar) -> Result<(), PipelineError> {
    bars.upsert_bar(bar).await.map_err(PipelineError::Dependency)
}

/// Persists a curve update and its resulting built curve.
pub async fn persist_curve(
    curves: &Arc<dyn CurveStore>,
    update: &CurveUpdate,
    built: &BuiltCurve,
) -> Result<(), PipelineError> {
    curves.append_curve_update(update).await.map_err(PipelineError::Dependency)?;
    curves.put_computed_curve(built).await.map_err(PipelineError::Dependency)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use refinery_core::{CurvePoint, QualityFlags, SourceId, Tick};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn tick_at(secs: u32, price: i64) -> EnrichedTick {
        let t = Tick {
            tenant_id: TenantId::new("t1"),
            instrument_id: InstrumentId::new("NG"),
            event_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, secs).unwrap(),
            price: rust_decimal::Decimal::from(price),
            volume: dec!(1),
            source_id: SourceId::new("s"),
            quality_flags: QualityFlags::new(),
            metadata: BTreeMap::new(),
        };
        EnrichedTick {
            tick: t,
            commodity_tier: "gas".to_string(),
            region_tier: "na".to_string(),
            product_tier: "futures".to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn window_closes_once_watermark_passes_end_plus_grace() {
        let mut agg = Aggregator::new(vec![Interval::ONE_MINUTE], 0, 5 * 60_000, 0);
        let r1 = agg.on_tick(&tick_at(5, 100));
        assert!(matches!(r1.folds[0].1, FoldOutcome::Folded));
        assert!(r1.closed.is_empty());
        assert_eq!(agg.open_window_count(), 1);

        // A tick at 65s puts the watermark at 65s (max_out_of_order=0), which
        // is past the first window's end (60s) plus zero grace.
        let r2 = agg.on_tick(&tick_at(65, 110));
        assert_eq!(r2.closed.len(), 1);
        let bar = &r2.closed[0];
        assert_eq!(bar.open, rust_decimal::Decimal::from(100));
        assert_eq!(bar.close, rust_decimal::Decimal::from(100));
        assert_eq!(agg.open_window_count(), 1);
    }

    #[test]
    fn late_tick_within_lookback_revises_closed_bar() {
        let mut agg = Aggregator::new(vec![Interval::ONE_MINUTE], 0, 5 * 60_000, 0);
        agg.on_tick(&tick_at(5, 100));
        agg.on_tick(&tick_at(55, 110));
        let close_result = agg.on_tick(&tick_at(65, 999));
        assert_eq!(close_result.closed.len(), 1);

        let late_result = agg.on_tick(&tick_at(30, 90));
        match &late_result.folds[0].1 {
            FoldOutcome::Revised(bar) => {
                assert_eq!(bar.revision, 2);
                assert_eq!(bar.low, rust_decimal::Decimal::from(90));
            }
            _ => panic!("expected a revised bar"),
        }
    }

    #[test]
    fn late_tick_past_lookback_is_not_folded() {
        let mut agg = Aggregator::new(vec![Interval::ONE_MINUTE], 0, 1_000, 0);
        agg.on_tick(&tick_at(5, 100));
        agg.on_tick(&tick_at(65, 999));
        // Advance the watermark well past the closed window's 1s lookback.
        agg.on_tick(&tick_at(70, 999));

        let late_result = agg.on_tick(&tick_at(30, 90));
        assert!(matches!(late_result.folds[0].1, FoldOutcome::TooLateToFold));
    }

    #[test]
    fn curve_update_applies_through_single_entry_point() {
        let mut agg = Aggregator::new(vec![Interval::ONE_MINUTE], 0, 0, 0);
        let update = CurveUpdate {
            curve_id: CurveId::new("NG.FWD"),
            as_of_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            points: vec![CurvePoint {
                curve_id: CurveId::new("NG.FWD"),
                as_of_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                tenor: "T0".to_string(),
                tenor_ordinal: 0,
                price: dec!(100),
            }],
        };
        let built = agg.on_curve_update(&update);
        assert_eq!(built.points.get(&0), Some(&dec!(100)));
    }
}
