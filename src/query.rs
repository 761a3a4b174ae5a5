// src/query.rs
//! Timeframe views over an index series.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AttentionIndex, Series};
use crate::normalize::round2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "3h")]
    H3,
    #[serde(rename = "24h")]
    H24,
    #[serde(rename = "7d")]
    D7,
    #[serde(rename = "30d")]
    D30,
}

impl Timeframe {
    /// Unrecognized or missing values fall back to 3h.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("24h") => Timeframe::H24,
            Some("7d") => Timeframe::D7,
            Some("30d") => Timeframe::D30,
            _ => Timeframe::H3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::H3 => "3h",
            Timeframe::H24 => "24h",
            Timeframe::D7 => "7d",
            Timeframe::D30 => "30d",
        }
    }

    pub fn span(self) -> Duration {
        match self {
            Timeframe::H3 => Duration::hours(3),
            Timeframe::H24 => Duration::hours(24),
            Timeframe::D7 => Duration::days(7),
            Timeframe::D30 => Duration::days(30),
        }
    }

    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.span()
    }
}

/// Entries at or after the cutoff.
pub fn filter_series(series: &Series, timeframe: Timeframe, now: DateTime<Utc>) -> Series {
    series
        .range(timeframe.cutoff(now)..)
        .map(|(t, e)| (*t, e.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetrics {
    pub current: f64,
    pub peak: f64,
    pub change: f64,
    pub change_percent: f64,
}

pub fn compute_metrics(series: &Series) -> IndexMetrics {
    let (Some(first), Some(last)) = (series.values().next(), series.values().next_back()) else {
        return IndexMetrics::default();
    };
    let peak = series.values().map(|e| e.value).fold(f64::NEG_INFINITY, f64::max);
    let change = last.value - first.value;
    let change_percent = if first.value == 0.0 {
        0.0
    } else {
        round2(change / first.value * 100.0)
    };
    IndexMetrics {
        current: last.value,
        peak,
        change,
        change_percent,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexView {
    pub index_id: u64,
    pub timeframe: Timeframe,
    pub series: Series,
    pub metrics: IndexMetrics,
    pub log_scale: bool,
}

/// Filter, summarize and optionally log-scale (`ln(v + 1)`) an index's series.
/// Metrics are computed on the unscaled values; the stored series is never touched.
pub fn query_index(
    index: &AttentionIndex,
    timeframe: Timeframe,
    now: DateTime<Utc>,
    log_scale: bool,
) -> IndexView {
    let mut series = filter_series(&index.series, timeframe, now);
    let metrics = compute_metrics(&series);
    if log_scale {
        // Rebased aggregates can go negative; those plot at the floor.
        for e in series.values_mut() {
            e.value = (e.value.max(0.0) + 1.0).ln();
        }
    }
    IndexView {
        index_id: index.id,
        timeframe,
        series,
        metrics,
        log_scale,
    }
}
