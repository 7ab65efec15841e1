//! Light-condition summary over a time range of stored rows.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::StoredRecord;

/// Minute-average lux above which a minute counts as full sun.
pub const FULL_SUN_LUX: f64 = 10_000.0;

/// Default summary window when no range is given.
pub const DEFAULT_RANGE_HOURS: i64 = 8;

/// Qualitative classification of a range by its share of full-sun time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum LightCondition {
    FullSun,
    PartialSun,
    PartialShade,
    Shade,
    NoData,
}

impl LightCondition {
    fn from_ratio(ratio: f64) -> Self {
        if ratio > 0.5 {
            Self::FullSun
        } else if ratio > 0.25 {
            Self::PartialSun
        } else if ratio > 0.1 {
            Self::PartialShade
        } else {
            Self::Shade
        }
    }
}

impl fmt::Display for LightCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FullSun => "Full Sun",
            Self::PartialSun => "Partial Sun",
            Self::PartialShade => "Partial Shade",
            Self::Shade => "Shade",
            Self::NoData => "No Data in Range",
        };
        f.write_str(name)
    }
}

/// Aggregate figures for rows in `[start, end]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct RangeSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub samples: usize,
    pub average_lux: f64,
    /// Hours between the oldest and newest row.
    pub recorded_hours: f64,
    /// Minutes whose mean lux exceeds [`FULL_SUN_LUX`], in hours.
    pub full_sun_hours: f64,
    pub condition: LightCondition,
}

/// The `[now - 8h, now]` window.
pub fn default_range(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::hours(DEFAULT_RANGE_HOURS), now)
}

/// Summarize `records`, which are expected to already lie within `[start, end]`.
pub fn summarize(records: &[StoredRecord], start: DateTime<Utc>, end: DateTime<Utc>) -> RangeSummary {
    let empty = RangeSummary {
        start,
        end,
        samples: records.len(),
        average_lux: 0.0,
        recorded_hours: 0.0,
        full_sun_hours: 0.0,
        condition: LightCondition::NoData,
    };
    if records.is_empty() {
        return empty;
    }

    let average_lux = records.iter().map(|r| r.lux).sum::<f64>() / records.len() as f64;
    if average_lux == 0.0 {
        return RangeSummary {
            average_lux,
            ..empty
        };
    }

    let (oldest, newest) = records.iter().fold((None, None), |(lo, hi), r| {
        let t = r.created_at;
        (
            Some(lo.map_or(t, |lo: DateTime<Utc>| lo.min(t))),
            Some(hi.map_or(t, |hi: DateTime<Utc>| hi.max(t))),
        )
    });
    let recorded_hours = match (oldest, newest) {
        (Some(lo), Some(hi)) => (hi - lo).num_milliseconds() as f64 / 3_600_000.0,
        _ => 0.0,
    };

    let mut minutes: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for r in records {
        let entry = minutes
            .entry(r.created_at.timestamp().div_euclid(60))
            .or_insert((0.0, 0));
        entry.0 += r.lux;
        entry.1 += 1;
    }
    let full_sun_minutes = minutes
        .values()
        .filter(|(sum, count)| sum / *count as f64 > FULL_SUN_LUX)
        .count();
    let full_sun_hours = full_sun_minutes as f64 / 60.0;

    let ratio = if recorded_hours > 0.0 {
        full_sun_hours / recorded_hours
    } else if full_sun_hours > 0.0 {
        1.0
    } else {
        0.0
    };

    RangeSummary {
        average_lux,
        recorded_hours,
        full_sun_hours,
        condition: LightCondition::from_ratio(ratio),
        ..empty
    }
}
