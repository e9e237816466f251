// Aggregations over queried series
//
// Every function here is pure: same series in, same result out.
use crate::domain::aggregate::{AggregateResult, AggregateValue, MetricKind};
use crate::domain::error::ReportError;
use crate::domain::metrics::{LabelSet, MetricSample, MetricSeries, TimeWindow};
use crate::domain::target::Target;
use chrono::DateTime;
use std::collections::BTreeMap;

const QUANTILE_LABEL: &str = "quantile";
const BUCKET_LABEL: &str = "le";

/// Label sets of `series` belonging to `target`, with non-finite samples dropped.
fn matching<'a>(
    series: &'a MetricSeries,
    target: &'a Target,
) -> impl Iterator<Item = (&'a LabelSet, Vec<MetricSample>)> + 'a {
    series
        .iter()
        .filter(move |(labels, _)| target.matches(labels))
        .map(|(labels, samples)| {
            let finite: Vec<MetricSample> = samples.iter().copied().filter(|s| s.value.is_finite()).collect();
            (labels, finite)
        })
}

/// Increase between two consecutive counter samples. A drop marks a reset:
/// the counter restarted from zero and reached the later value.
fn counter_delta(previous: f64, current: f64) -> f64 {
    if current >= previous { current - previous } else { current }
}

/// Total increase of a counter over its samples.
pub fn counter_increase(samples: &[MetricSample]) -> f64 {
    samples
        .windows(2)
        .map(|pair| counter_delta(pair[0].value, pair[1].value))
        .filter(|delta| delta.is_finite() && *delta > 0.0)
        .fold(0.0, |total, delta| total + delta)
}

fn target_increase(series: &MetricSeries, target: &Target) -> f64 {
    matching(series, target)
        .map(|(_, samples)| counter_increase(&samples))
        .fold(0.0, |total, increase| total + increase)
}

fn insufficient(series: &MetricSeries, target: &Target) -> ReportError {
    ReportError::InsufficientData(format!(
        "no samples for {} in window of '{}'",
        target.name, series.expr
    ))
}

/// Requests per second over the series window.
pub fn compute_rate(series: &MetricSeries, target: &Target) -> AggregateResult {
    let increase = target_increase(series, target);
    let seconds = series.window.seconds();
    let rate = if seconds > 0.0 { increase / seconds } else { 0.0 };
    AggregateResult::new(MetricKind::RequestRate, &target.name, AggregateValue::Scalar(rate), series.window)
}

pub fn compute_request_count(series: &MetricSeries, target: &Target) -> AggregateResult {
    let increase = target_increase(series, target);
    AggregateResult::new(MetricKind::RequestCount, &target.name, AggregateValue::Scalar(increase), series.window)
}

/// Share of requests that did not succeed. No traffic means no errors.
pub fn compute_error_ratio(success: &MetricSeries, total: &MetricSeries, target: &Target) -> AggregateResult {
    let total_count = target_increase(total, target);
    let success_count = target_increase(success, target);
    let failed = (total_count - success_count).max(0.0);
    let ratio = if total_count > 0.0 {
        (failed / total_count).clamp(0.0, 1.0)
    } else {
        0.0
    };
    AggregateResult::new(MetricKind::ErrorRatio, &target.name, AggregateValue::Scalar(ratio), total.window)
}

/// Percentile `p` (exclusive 0..100) from summary quantiles, histogram
/// buckets, or a series that already holds the quantile.
pub fn compute_percentile(series: &MetricSeries, target: &Target, p: f64) -> Result<AggregateResult, ReportError> {
    if !(p > 0.0 && p < 100.0) {
        return Err(ReportError::InvalidQuery(format!("percentile {} is outside (0, 100)", p)));
    }
    let q = p / 100.0;

    let matched: Vec<(&LabelSet, Vec<MetricSample>)> = matching(series, target)
        .filter(|(_, samples)| !samples.is_empty())
        .collect();
    if matched.is_empty() {
        return Err(insufficient(series, target));
    }

    let value = if matched.iter().any(|(labels, _)| labels.get(QUANTILE_LABEL).is_some()) {
        summary_quantile(&matched, q)
    } else if matched.iter().any(|(labels, _)| labels.get(BUCKET_LABEL).is_some()) {
        histogram_quantile(&matched, q)
    } else {
        latest_max(&matched)
    };

    let value = value.ok_or_else(|| insufficient(series, target))?;
    Ok(AggregateResult::new(MetricKind::Latency, &target.name, AggregateValue::Scalar(value), series.window))
}

/// Largest of the latest values across label sets.
fn latest_max(matched: &[(&LabelSet, Vec<MetricSample>)]) -> Option<f64> {
    matched
        .iter()
        .filter_map(|(_, samples)| samples.last().map(|s| s.value))
        .reduce(f64::max)
}

/// Latest value of a gauge for one target, e.g. k6's min/max trend gauges.
pub fn compute_latest(series: &MetricSeries, target: &Target) -> Result<AggregateResult, ReportError> {
    let matched: Vec<(&LabelSet, Vec<MetricSample>)> = matching(series, target).collect();
    let value = latest_max(&matched).ok_or_else(|| insufficient(series, target))?;
    Ok(AggregateResult::new(MetricKind::Gauge, &target.name, AggregateValue::Scalar(value), series.window))
}

/// Mean per observation: increase of a running sum over the increase of its
/// observation count, as with a histogram's `_sum` and `_count`.
pub fn compute_mean(sum: &MetricSeries, count: &MetricSeries, target: &Target) -> Result<AggregateResult, ReportError> {
    let observations = target_increase(count, target);
    if observations <= 0.0 {
        return Err(insufficient(count, target));
    }
    let mean = target_increase(sum, target) / observations;
    Ok(AggregateResult::new(MetricKind::AverageLatency, &target.name, AggregateValue::Scalar(mean), sum.window))
}

/// Sorts `(key, value)` pairs by key and folds equal keys with `merge`.
fn merge_sorted(mut points: Vec<(f64, f64)>, merge: fn(f64, f64) -> f64) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for (key, value) in points {
        match merged.last_mut() {
            Some(last) if last.0 == key => last.1 = merge(last.1, value),
            _ => merged.push((key, value)),
        }
    }
    merged
}

fn summary_quantile(matched: &[(&LabelSet, Vec<MetricSample>)], q: f64) -> Option<f64> {
    let reported: Vec<(f64, f64)> = matched
        .iter()
        .filter_map(|(labels, samples)| {
            let quantile = labels.get(QUANTILE_LABEL)?.parse::<f64>().ok()?;
            Some((quantile, samples.last()?.value))
        })
        .collect();
    let points = merge_sorted(reported, f64::max);

    let first = *points.first()?;
    let last = *points.last()?;
    if q <= first.0 {
        return Some(first.1);
    }
    if q >= last.0 {
        return Some(last.1);
    }
    points.windows(2).find(|pair| q <= pair[1].0).map(|pair| {
        let (q0, v0) = pair[0];
        let (q1, v1) = pair[1];
        v0 + (v1 - v0) * (q - q0) / (q1 - q0)
    })
}

fn histogram_quantile(matched: &[(&LabelSet, Vec<MetricSample>)], q: f64) -> Option<f64> {
    let counts: Vec<(f64, f64)> = matched
        .iter()
        .filter_map(|(labels, samples)| {
            let upper = labels.get(BUCKET_LABEL)?.parse::<f64>().ok()?;
            Some((upper, counter_increase(samples)))
        })
        .collect();
    let mut buckets = merge_sorted(counts, |a, b| a + b);

    // Cumulative counts never decrease across bounds
    for i in 1..buckets.len() {
        buckets[i].1 = buckets[i].1.max(buckets[i - 1].1);
    }

    let total = buckets.last()?.1;
    if total <= 0.0 {
        return None;
    }
    let rank = q * total;
    let idx = buckets.iter().position(|(_, count)| *count >= rank)?;
    let (upper, count) = buckets[idx];

    if upper.is_infinite() {
        return idx.checked_sub(1).map(|prev| buckets[prev].0);
    }
    if idx == 0 && upper <= 0.0 {
        return Some(upper);
    }
    let (lower, below) = if idx == 0 { (0.0, 0.0) } else { buckets[idx - 1] };
    let in_bucket = count - below;
    if in_bucket <= 0.0 {
        return Some(upper);
    }
    Some(lower + (upper - lower) * (rank - below) / in_bucket)
}

/// Average and peak of a gauge for one target, summing the target's label
/// sets (e.g. several pods) at each timestamp.
pub fn compute_resource_usage(
    series: &MetricSeries,
    target: &Target,
    kind: MetricKind,
) -> Result<AggregateResult, ReportError> {
    let summed = sum_by_timestamp(series, |labels| target.matches(labels));
    if summed.is_empty() {
        return Err(insufficient(series, target));
    }

    let avg = summed.iter().map(|s| s.value).sum::<f64>() / summed.len() as f64;
    let peak = summed.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max);
    Ok(AggregateResult::new(kind, &target.name, AggregateValue::Usage { avg, peak }, series.window))
}

/// Per-timestamp sum of several sample sets.
pub fn sum_points<I>(sets: I) -> Vec<MetricSample>
where
    I: IntoIterator<Item = Vec<MetricSample>>,
{
    let mut by_time: BTreeMap<i64, f64> = BTreeMap::new();
    for samples in sets {
        for sample in samples.into_iter().filter(|s| s.value.is_finite()) {
            *by_time.entry(sample.time_ms).or_insert(0.0) += sample.value;
        }
    }
    by_time
        .into_iter()
        .map(|(time_ms, value)| MetricSample::new(time_ms, value))
        .collect()
}

/// Per-timestamp sum over the label sets accepted by `filter`.
pub fn sum_by_timestamp<F>(series: &MetricSeries, filter: F) -> Vec<MetricSample>
where
    F: Fn(&LabelSet) -> bool,
{
    sum_points(
        series
            .iter()
            .filter(|(labels, _)| filter(labels))
            .map(|(_, samples)| samples.to_vec()),
    )
}

/// Per-interval rate of a counter, stamped at the end of each interval.
/// Resets are handled as in `counter_increase`.
pub fn rate_points(samples: &[MetricSample]) -> Vec<MetricSample> {
    samples
        .windows(2)
        .filter_map(|pair| {
            let seconds = (pair[1].time_ms - pair[0].time_ms) as f64 / 1000.0;
            if seconds <= 0.0 {
                return None;
            }
            let delta = counter_delta(pair[0].value, pair[1].value).max(0.0);
            Some(MetricSample::new(pair[1].time_ms, delta / seconds))
        })
        .collect()
}

/// Request rate over time for one target, for charting.
pub fn target_rate_points(series: &MetricSeries, target: &Target) -> Vec<MetricSample> {
    sum_points(matching(series, target).map(|(_, samples)| rate_points(&samples)))
}

fn quantile_of(labels: &LabelSet) -> Option<f64> {
    labels.get(QUANTILE_LABEL).and_then(|v| v.parse::<f64>().ok())
}

/// Latency over time for one target, for charting. Summary series use the
/// reported quantile nearest to `p`; histogram buckets are not charted.
pub fn target_latency_points(series: &MetricSeries, target: &Target, p: f64) -> Vec<MetricSample> {
    let matched: Vec<(&LabelSet, Vec<MetricSample>)> = matching(series, target).collect();
    if matched.iter().any(|(labels, _)| labels.get(BUCKET_LABEL).is_some()) {
        return Vec::new();
    }

    let q = p / 100.0;
    let nearest = matched
        .iter()
        .filter_map(|(labels, _)| quantile_of(labels))
        .min_by(|a, b| (a - q).abs().total_cmp(&(b - q).abs()));

    let mut by_time: BTreeMap<i64, f64> = BTreeMap::new();
    for (labels, samples) in &matched {
        if nearest.is_some() && quantile_of(labels) != nearest {
            continue;
        }
        for sample in samples {
            let slot = by_time.entry(sample.time_ms).or_insert(f64::NEG_INFINITY);
            *slot = slot.max(sample.value);
        }
    }
    by_time
        .into_iter()
        .map(|(time_ms, value)| MetricSample::new(time_ms, value))
        .collect()
}

/// Span between the first and last sample above zero, if any.
pub fn active_window(series: &MetricSeries) -> Option<TimeWindow> {
    let active = series
        .iter()
        .flat_map(|(_, samples)| samples.iter())
        .filter(|s| s.value > 0.0)
        .map(|s| s.time_ms);

    let (first, last) = active.fold(None, |span: Option<(i64, i64)>, t| match span {
        Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        None => Some((t, t)),
    })?;
    if first >= last {
        return None;
    }
    Some(TimeWindow::new(
        DateTime::from_timestamp_millis(first)?,
        DateTime::from_timestamp_millis(last)?,
    ))
}
