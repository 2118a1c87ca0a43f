use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

use crate::tabular::NormalizedSample;

/// Default distance a sample may sit from its target hour.
pub const DEFAULT_TOLERANCE_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Nearest,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub target_hour: DateTime<Utc>,
    pub sample: Option<NormalizedSample>,
    pub kind: MatchKind,
    /// Sample time minus target time; zero when nothing matched.
    pub offset_seconds: i64,
}

impl MatchResult {
    fn unmatched(target_hour: DateTime<Utc>) -> Self {
        Self {
            target_hour,
            sample: None,
            kind: MatchKind::None,
            offset_seconds: 0,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.sample.is_some()
    }
}

/// One `MatchResult` per target, in the order the targets were given.
/// Repeated targets each keep their own entry.
pub type HourlyAlignment = Vec<MatchResult>;

/// Match each target instant to the closest sample within `tolerance`.
///
/// A sample at exactly the target wins outright. Otherwise the smallest
/// absolute delta wins and equal deltas go to the earlier sample. Targets
/// with nothing in range still get an entry, with `MatchKind::None`.
/// A negative tolerance is treated as zero, so only exact matches count.
pub fn align(
    samples: &[NormalizedSample],
    targets: &[DateTime<Utc>],
    tolerance: Duration,
) -> HourlyAlignment {
    let tolerance = tolerance.max(Duration::zero());
    let mut ordered: Vec<&NormalizedSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.utc);

    targets
        .iter()
        .map(|&target| match_target(&ordered, target, tolerance))
        .collect()
}

fn match_target(
    ordered: &[&NormalizedSample],
    target: DateTime<Utc>,
    tolerance: Duration,
) -> MatchResult {
    let window_start = target - tolerance;
    let first = ordered.partition_point(|s| s.utc < window_start);

    let mut best: Option<(Duration, &NormalizedSample)> = None;
    for &sample in &ordered[first..] {
        let delta = (sample.utc - target).abs();
        if sample.utc > target + tolerance {
            break;
        }
        if delta.is_zero() {
            best = Some((delta, sample));
            break;
        }
        if best.map_or(true, |(best_delta, _)| delta < best_delta) {
            best = Some((delta, sample));
        }
    }

    match best {
        None => MatchResult::unmatched(target),
        Some((delta, sample)) => MatchResult {
            target_hour: target,
            sample: Some(sample.clone()),
            kind: if delta.is_zero() {
                MatchKind::Exact
            } else {
                MatchKind::Nearest
            },
            offset_seconds: (sample.utc - target).num_seconds(),
        },
    }
}

/// Target hours that ended up without a sample, in chronological order.
pub fn missing_hours(alignment: &HourlyAlignment) -> Vec<DateTime<Utc>> {
    alignment
        .iter()
        .filter(|m| !m.is_matched())
        .map(|m| m.target_hour)
        .collect()
}

/// `hours` consecutive top-of-hour instants ending at `end` (truncated to the hour).
pub fn target_hours(end: DateTime<Utc>, hours: u32) -> Vec<DateTime<Utc>> {
    let end = truncate_to_hour(end);
    (0..i64::from(hours))
        .rev()
        .map(|back| end - Duration::hours(back))
        .collect()
}

pub fn truncate_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(Duration::hours(1))
        .unwrap_or(instant)
}
