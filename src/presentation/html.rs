// HTML report renderer
use super::svg::render_chart;
use super::templates;
use crate::domain::aggregate::MetricKind;
use crate::domain::error::ReportError;
use crate::domain::load_profile::format_duration;
use crate::domain::report::{OutcomeCounts, ReportData, Threshold, Verdict, evaluate};
use bytes::Bytes;
use serde::Serialize;
use tera::Context;

#[derive(Serialize)]
struct WindowView {
    start: String,
    end: String,
    seconds: String,
    stamp: String,
    as_of: String,
}

#[derive(Serialize)]
struct Card {
    value: String,
    label: &'static str,
}

#[derive(Serialize)]
struct StageRow {
    duration: String,
    vus: u32,
}

#[derive(Serialize)]
struct ProfileView {
    total: String,
    peak: u32,
    stages: Vec<StageRow>,
}

#[derive(Serialize)]
struct OutcomeRow {
    metric: String,
    target: String,
    measured: String,
    expected: String,
    status: &'static str,
    label: &'static str,
}

#[derive(Serialize)]
struct ResultRow {
    target: String,
    metric: String,
    value: String,
    placeholder: bool,
}

#[derive(Serialize)]
struct ChartView {
    id: String,
    svg: String,
}

fn badge_class(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "pass",
        Verdict::Fail => "fail",
        Verdict::NoData => "nodata",
    }
}

/// Renders the self-contained HTML report. The header is stamped with the
/// window end, so equal inputs render byte-identical documents.
pub fn render_html(data: &ReportData, thresholds: &[Threshold]) -> Result<Bytes, ReportError> {
    let outcomes = evaluate(&data.results, thresholds);
    let counts = OutcomeCounts::tally(&outcomes);

    let mut cards = Vec::with_capacity(4);
    if let Some(total) = data.total_of(MetricKind::RequestCount) {
        cards.push(Card { value: format!("{:.0}", total), label: "Total requests" });
    }
    cards.push(Card { value: counts.passed.to_string(), label: "Checks passed" });
    cards.push(Card { value: counts.failed.to_string(), label: "Checks failed" });
    cards.push(Card { value: counts.skipped.to_string(), label: "No data" });

    let profile = (!data.profile.is_empty()).then(|| ProfileView {
        total: format_duration(data.profile.total_duration()),
        peak: data.profile.peak_vus(),
        stages: data
            .profile
            .stages
            .iter()
            .map(|stage| StageRow { duration: format_duration(stage.duration), vus: stage.vus })
            .collect(),
    });

    let outcome_rows: Vec<OutcomeRow> = outcomes
        .iter()
        .map(|outcome| OutcomeRow {
            metric: outcome.result.metric.clone(),
            target: outcome.result.target.clone(),
            measured: outcome.measured(),
            expected: outcome.expected(),
            status: badge_class(outcome.verdict),
            label: outcome.verdict.label(),
        })
        .collect();

    let mut by_target: Vec<_> = data.results.iter().collect();
    by_target.sort_by(|a, b| a.target.cmp(&b.target).then_with(|| a.metric.cmp(&b.metric)));
    let results: Vec<ResultRow> = by_target
        .into_iter()
        .map(|result| ResultRow {
            target: result.target.clone(),
            metric: result.metric.clone(),
            value: result.display_value(),
            placeholder: result.is_placeholder(),
        })
        .collect();

    let charts = data
        .charts
        .iter()
        .map(|chart| {
            Ok(ChartView {
                id: chart.id.clone(),
                svg: render_chart(chart, &data.bands)?,
            })
        })
        .collect::<Result<Vec<_>, ReportError>>()?;

    let window = WindowView {
        start: data.window.start.format("%H:%M:%S UTC").to_string(),
        end: data.window.end.format("%H:%M:%S UTC").to_string(),
        seconds: format!("{:.0}", data.window.seconds()),
        stamp: data.window.end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        as_of: data.window.end.format("%B %d, %Y at %H:%M UTC").to_string(),
    };

    let mut context = Context::new();
    context.insert("title", &data.title);
    context.insert("window", &window);
    context.insert("cards", &cards);
    context.insert("profile", &profile);
    context.insert("outcomes", &outcome_rows);
    context.insert("results", &results);
    context.insert("charts", &charts);

    let html = templates()?.render("report.html", &context)?;
    Ok(Bytes::from(html))
}
