//! Forward-curve types and the default interpolation strategy.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{CurveId, Horizon, InstrumentId, TenantId};

/// A single forward-curve point: a price quoted for a tenor on an as-of date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Curve this point belongs to.
    pub curve_id: CurveId,
    /// As-of date the curve was built for.
    pub as_of_date: NaiveDate,
    /// Tenor label, ordered lexically by `tenor_ordinal` for interpolation.
    pub tenor: String,
    /// Ordinal position of `tenor` within the curve, used for interpolation spacing.
    pub tenor_ordinal: u32,
    /// Quoted price for this tenor.
    pub price: Decimal,
}

/// An incoming curve update: a full or incremental set of points for one
/// `(curve_id, as_of_date)`. Within one `(tenant, curve_id, as_of_date)` the
/// latest received write wins for each tenor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveUpdate {
    /// Curve being updated.
    pub curve_id: CurveId,
    /// As-of date of the update.
    pub as_of_date: NaiveDate,
    /// Points carried by this update; may be a subset of the full curve.
    pub points: Vec<CurvePoint>,
}

/// A curve update addressed to one served projection key. `CurveUpdate` itself
/// carries no tenant/instrument/horizon — those are routing attributes the
/// curve-update topic's key applies on top of the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveUpdateRequest {
    /// Tenant the resulting curve snapshot is served under.
    pub tenant_id: TenantId,
    /// Instrument (or curve subject) the snapshot represents.
    pub instrument_id: InstrumentId,
    /// Forward-time bucket the snapshot is keyed by.
    pub horizon: Horizon,
    /// The base curve update to fold in.
    pub update: CurveUpdate,
}

/// A curve built from accumulated base points, pluggable by interpolation strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltCurve {
    /// Curve identifier.
    pub curve_id: CurveId,
    /// As-of date.
    pub as_of_date: NaiveDate,
    /// Base points keyed by tenor ordinal, latest-write-wins per tenor.
    pub points: BTreeMap<u32, Decimal>,
    /// Name of the interpolation strategy used to produce computed values.
    pub interpolation_method: String,
    /// Confidence in the computed curve (lower when base points are sparse).
    pub confidence: f64,
}

impl BuiltCurve {
    /// Starts a new empty curve using the default linear-by-tenor-ordinal strategy.
    pub fn new(curve_id: CurveId, as_of_date: NaiveDate) -> Self {
        Self {
            curve_id,
            as_of_date,
            points: BTreeMap::new(),
            interpolation_method: "linear_by_tenor_ordinal".to_string(),
            confidence: 0.0,
        }
    }

    /// Applies an update, overwriting any existing point at the same tenor ordinal.
    pub fn apply_update(&mut self, update: &CurveUpdate) {
        for point in &update.points {
            self.points.insert(point.tenor_ordinal, point.price);
        }
        self.confidence = if self.points.len() >= 2 { 1.0 } else { 0.5 };
    }

    /// Interpolates a price at `ordinal` using linear interpolation between the
    /// nearest known base points, clamped at the edges of the known range.
    pub fn interpolate(&self, ordinal: u32) -> Option<Decimal> {
        if self.points.is_empty() {
            return None;
        }
        if let Some(exact) = self.points.get(&ordinal) {
            return Some(*exact);
        }

        let lower = self.points.range(..ordinal).next_back();
        let upper = self.points.range(ordinal..).next();

        match (lower, upper) {
            (Some((lo_o, lo_p)), Some((hi_o, hi_p))) => {
                let span = (*hi_o - *lo_o) as i64;
                if span == 0 {
                    return Some(*lo_p);
                }
                let frac = Decimal::from((ordinal - *lo_o) as i64) / Decimal::from(span);
                Some(*lo_p + (*hi_p - *lo_p) * frac)
            }
            (Some((_, lo_p)), None) => Some(*lo_p),
            (None, Some((_, hi_p))) => Some(*hi_p),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn update(points: &[(u32, i64)]) -> CurveUpdate {
        CurveUpdate {
            curve_id: CurveId::new("NG.FWD"),
            as_of_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            points: points
                .iter()
                .map(|(ord, price)| CurvePoint {
                    curve_id: CurveId::new("NG.FWD"),
                    as_of_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    tenor: format!("T{}", ord),
                    tenor_ordinal: *ord,
                    price: Decimal::from(*price),
                })
                .collect(),
        }
    }

    #[test]
    fn linear_interpolation_between_known_points() {
        let mut curve = BuiltCurve::new(CurveId::new("NG.FWD"), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        curve.apply_update(&update(&[(0, 100), (10, 200)]));
        assert_eq!(curve.interpolate(5), Some(dec!(150)));
        assert_eq!(curve.interpolate(0), Some(dec!(100)));
        assert_eq!(curve.interpolate(10), Some(dec!(200)));
    }

    #[test]
    fn edges_clamp_to_nearest_known_point() {
        let mut curve = BuiltCurve::new(CurveId::new("NG.FWD"), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        curve.apply_update(&update(&[(5, 100), (10, 200)]));
        assert_eq!(curve.interpolate(0), Some(dec!(100)));
        assert_eq!(curve.interpolate(20), Some(dec!(200)));
    }

    #[test]
    fn latest_write_wins_per_tenor() {
        let mut curve = BuiltCurve::new(CurveId::new("NG.FWD"), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        curve.apply_update(&update(&[(0, 100)]));
        curve.apply_update(&update(&[(0, 150)]));
        assert_eq!(curve.points.get(&0), Some(&dec!(150)));
    }
}
