// JUnit XML renderer for CI result collectors
use super::templates;
use crate::domain::error::ReportError;
use crate::domain::report::{OutcomeCounts, ReportData, Threshold, Verdict, evaluate};
use bytes::Bytes;
use serde::Serialize;
use tera::Context;

const DATA_SOURCE: &str = "Prometheus";
const SUITE_NAME: &str = "Load Test Thresholds";

#[derive(Serialize)]
struct Property {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct Case {
    metric: String,
    target: String,
    status: &'static str,
    label: &'static str,
    message: String,
    measured: String,
    expected: String,
}

/// Renders one `<testcase>` per threshold and target. A breach is a
/// `<failure>`, a placeholder result is `<skipped>`.
pub fn render_junit(data: &ReportData, thresholds: &[Threshold]) -> Result<Bytes, ReportError> {
    let outcomes = evaluate(&data.results, thresholds);
    let counts = OutcomeCounts::tally(&outcomes);
    let timestamp = data.window.end.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let window_start = data.window.start.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut properties = vec![
        Property { name: "data_source".to_string(), value: DATA_SOURCE.to_string() },
        Property { name: "window_start".to_string(), value: window_start.clone() },
        Property { name: "window_end".to_string(), value: timestamp.clone() },
    ];
    properties.extend(data.results.iter().map(|result| Property {
        name: format!("{}.{}", result.metric, result.target),
        value: match result.value.comparable() {
            Some(v) => format!("{:.6}", v),
            None => "no data".to_string(),
        },
    }));

    let cases: Vec<Case> = outcomes
        .iter()
        .map(|outcome| Case {
            metric: outcome.result.metric.clone(),
            target: outcome.result.target.clone(),
            status: match outcome.verdict {
                Verdict::Pass => "pass",
                Verdict::Fail => "fail",
                Verdict::NoData => "skipped",
            },
            label: outcome.verdict.label(),
            message: outcome.failure_message(),
            measured: outcome.measured(),
            expected: outcome.expected(),
        })
        .collect();
    let measured: Vec<String> = data.results.iter().map(ToString::to_string).collect();

    let mut context = Context::new();
    context.insert("title", &data.title);
    context.insert("suite", SUITE_NAME);
    context.insert("data_source", DATA_SOURCE);
    context.insert("tests", &counts.total());
    context.insert("counts", &counts);
    context.insert("time", &format!("{:.3}", data.window.seconds()));
    context.insert("seconds", &format!("{:.0}", data.window.seconds()));
    context.insert("timestamp", &timestamp);
    context.insert("window_start", &window_start);
    context.insert("properties", &properties);
    context.insert("cases", &cases);
    context.insert("measured", &measured);

    let xml = templates()?.render("junit.xml", &context)?;
    Ok(Bytes::from(xml))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregate::{AggregateResult, AggregateValue, MetricKind};
    use crate::domain::metrics::TimeWindow;
    use crate::domain::report::Comparison;
    use chrono::{TimeZone, Utc};

    fn window() -> TimeWindow {
        let end = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        TimeWindow::new(end - chrono::Duration::seconds(60), end)
    }

    fn latency(target: &str, value: AggregateValue) -> AggregateResult {
        AggregateResult::new(MetricKind::Latency, target, value, window()).named("latency_p95_ms")
    }

    fn report(results: Vec<AggregateResult>) -> ReportData {
        ReportData::new("Load Test".to_string(), window(), results, vec![])
    }

    fn thresholds() -> Vec<Threshold> {
        vec![
            Threshold::new("latency_p95_ms", Comparison::Lt, 500.0),
            Threshold::new("error_ratio", Comparison::Lt, 0.01),
        ]
    }

    fn render(data: &ReportData) -> String {
        String::from_utf8(render_junit(data, &thresholds()).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_all_pass_has_no_failures() {
        let w = window();
        let data = report(vec![
            latency("foo", AggregateValue::Scalar(120.0)),
            latency("bar", AggregateValue::Scalar(80.0)),
            AggregateResult::new(MetricKind::ErrorRatio, "foo", AggregateValue::Scalar(0.0), w),
            AggregateResult::new(MetricKind::ErrorRatio, "bar", AggregateValue::Scalar(0.0), w),
        ]);
        let xml = render(&data);

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"tests="4" failures="0" errors="0" skipped="0" time="60.000" timestamp="2023-11-14T22:14:20Z""#));
        assert_eq!(xml.matches("<testcase ").count(), 4);
        assert_eq!(xml.matches("<failure").count(), 0);
        assert!(xml.contains("Thresholds: 4 passed, 0 failed, 0 without data"));
        assert!(xml.contains("\n    <properties>\n      <property name=\"data_source\" value=\"Prometheus\"/>\n"));
        assert!(xml.contains(r#"<testcase name="error_ratio" classname="loadtest.bar" time="60.000"/>"#));
        assert!(xml.trim_end().ends_with("</testsuites>"));
    }

    #[test]
    fn test_failure_and_skipped_cases() {
        let data = report(vec![
            latency("foo", AggregateValue::Scalar(612.4)),
            latency("bar", AggregateValue::NoData),
        ]);
        let xml = render(&data);

        assert!(xml.contains(r#"tests="2" failures="1" errors="0" skipped="1""#));
        assert!(xml.contains(r#"<testcase name="latency_p95_ms" classname="loadtest.foo" time="60.000">"#));
        assert!(xml.contains(
            r#"<failure message="latency_p95_ms for foo: measured 612.40 ms, threshold &lt; 500.00 ms" type="ThresholdBreach">"#
        ));
        assert!(xml.contains("Expected: &lt; 500.00 ms\nActual: 612.40 ms\nData Source: Prometheus\n"));
        assert!(xml.contains(r#"<skipped message="no data in window"/>"#));
        assert!(xml.contains(r#"<property name="latency_p95_ms.foo" value="612.400000"/>"#));
        assert!(xml.contains(r#"<property name="latency_p95_ms.bar" value="no data"/>"#));

        // bar sorts before foo
        let bar = xml.find("classname=\"loadtest.bar\"").unwrap();
        let foo = xml.find("classname=\"loadtest.foo\"").unwrap();
        assert!(bar < foo);
    }

    #[test]
    fn test_render_junit_is_deterministic() {
        let data = report(vec![
            latency("foo", AggregateValue::Scalar(612.4)),
            latency("bar", AggregateValue::Scalar(12.0)),
        ]);
        assert_eq!(render_junit(&data, &thresholds()).unwrap(), render_junit(&data, &thresholds()).unwrap());
    }
}
