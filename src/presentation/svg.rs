// Inline SVG line charts
use crate::domain::load_profile::StageBand;
use crate::domain::metrics::MetricSample;
use crate::domain::report::ChartData;
use chrono::DateTime;
use std::fmt::Write;
use tera::escape_html;

const WIDTH: f64 = 900.0;
const HEIGHT: f64 = 320.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 50.0;
const GRAPH_WIDTH: f64 = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
const GRAPH_HEIGHT: f64 = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

const Y_GRID_LINES: usize = 5;
const X_LABEL_INTERVALS: usize = 6;
const MAX_POINTS_PER_SERIES: usize = 150;

const PALETTE: [&str; 6] = ["#8b5cf6", "#22c55e", "#f59e0b", "#ef4444", "#06b6d4", "#ec4899"];
const CUMULATIVE_COLOR: &str = "#3b82f6";
const CUMULATIVE_FILL: &str = "#93c5fd";
const BAND_COLORS: [&str; 2] = ["#fafafa", "#f5f5f5"];

/// Rounds `value` up to the next multiple of `step`.
fn round_up(value: f64, step: f64) -> f64 {
    (value / step).ceil() * step
}

/// Reduces `points` to at most `max_points` by averaging consecutive buckets.
/// Each bucket keeps the timestamp of its middle point.
pub fn downsample_points(points: &[MetricSample], max_points: usize) -> Vec<MetricSample> {
    if points.is_empty() || points.len() <= max_points || max_points == 0 {
        return points.to_vec();
    }

    let bucket_size = (points.len() as f64 / max_points as f64).ceil() as usize;
    points
        .chunks(bucket_size)
        .map(|chunk| {
            let mid = chunk[chunk.len() / 2];
            let avg = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;
            MetricSample::new(mid.time_ms, avg)
        })
        .collect()
}

struct Scale {
    min_time: i64,
    time_range: f64,
    y_max: f64,
}

impl Scale {
    fn x(&self, time_ms: i64) -> f64 {
        MARGIN_LEFT + ((time_ms - self.min_time) as f64 / self.time_range) * GRAPH_WIDTH
    }

    fn y(&self, value: f64) -> f64 {
        MARGIN_TOP + GRAPH_HEIGHT - (value / self.y_max) * GRAPH_HEIGHT
    }

    fn path(&self, points: &[MetricSample]) -> String {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} {:.1},{:.1}", if i == 0 { "M" } else { "L" }, self.x(p.time_ms), self.y(p.value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Renders one chart with its cumulative area, a line per series, stage
/// bands and legend. Charts without samples render as a placeholder.
pub fn render_chart(chart: &ChartData, bands: &[StageBand]) -> Result<String, std::fmt::Error> {
    if !chart.has_data() {
        return empty_chart(&chart.title, "No data available");
    }

    let cumulative = chart
        .cumulative
        .as_ref()
        .map(|c| downsample_points(&c.points, MAX_POINTS_PER_SERIES))
        .unwrap_or_default();
    let series: Vec<(&str, Vec<MetricSample>)> = chart
        .series
        .iter()
        .map(|s| (s.name.as_str(), downsample_points(&s.points, MAX_POINTS_PER_SERIES)))
        .collect();

    let all_points = || cumulative.iter().chain(series.iter().flat_map(|(_, points)| points.iter()));
    let min_time = all_points().map(|p| p.time_ms).min().unwrap_or(0);
    let max_time = all_points().map(|p| p.time_ms).max().unwrap_or(0);
    let max_value = all_points().map(|p| p.value).fold(0.0, f64::max);
    let y_max = match round_up(max_value * 1.1, 10.0) {
        v if v > 0.0 => v,
        _ => 10.0,
    };
    let scale = Scale {
        min_time,
        time_range: if max_time > min_time { (max_time - min_time) as f64 } else { 1.0 },
        y_max,
    };

    let mut svg = String::new();
    write!(
        svg,
        r#"<svg viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg" role="img" style="width:100%;max-width:{w}px;height:auto;font-family:-apple-system,BlinkMacSystemFont,sans-serif;">"#,
        w = WIDTH,
        h = HEIGHT
    )?;
    write!(svg, r##"<rect width="{}" height="{}" fill="#ffffff" rx="12"/>"##, WIDTH, HEIGHT)?;

    for (i, band) in bands.iter().enumerate() {
        if band.start_ms >= max_time || band.end_ms <= min_time {
            continue;
        }
        let start_x = scale.x(band.start_ms.max(min_time));
        let end_x = scale.x(band.end_ms.min(max_time));
        write!(
            svg,
            r#"<rect x="{:.1}" y="{}" width="{:.1}" height="{}" fill="{}"/>"#,
            start_x,
            MARGIN_TOP,
            end_x - start_x,
            GRAPH_HEIGHT,
            BAND_COLORS[i % BAND_COLORS.len()]
        )?;
        write!(
            svg,
            r##"<text x="{:.1}" y="{}" text-anchor="middle" font-size="10" fill="#888">{} VUs</text>"##,
            (start_x + end_x) / 2.0,
            MARGIN_TOP - 8.0,
            band.vus
        )?;
    }

    for i in 0..=Y_GRID_LINES {
        let value = i as f64 / Y_GRID_LINES as f64 * y_max;
        let y = scale.y(value);
        write!(
            svg,
            r##"<line x1="{}" y1="{:.1}" x2="{}" y2="{:.1}" stroke="#e5e5e5" stroke-width="1"/>"##,
            MARGIN_LEFT,
            y,
            WIDTH - MARGIN_RIGHT,
            y
        )?;
        write!(
            svg,
            r##"<text x="{}" y="{:.1}" text-anchor="end" font-size="11" fill="#888">{:.0}</text>"##,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            value
        )?;
    }

    if let (Some(first), Some(last)) = (cumulative.first(), cumulative.last()) {
        let line = scale.path(&cumulative);
        let baseline = MARGIN_TOP + GRAPH_HEIGHT;
        write!(
            svg,
            r#"<path d="{} L {:.1},{:.1} L {:.1},{:.1} Z" fill="{}" fill-opacity="0.5"/>"#,
            line,
            scale.x(last.time_ms),
            baseline,
            scale.x(first.time_ms),
            baseline,
            CUMULATIVE_FILL
        )?;
        write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2.5"/>"#,
            line, CUMULATIVE_COLOR
        )?;
    }

    for (i, (_, points)) in series.iter().enumerate() {
        if points.is_empty() {
            continue;
        }
        write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="1.5" stroke-opacity="0.8"/>"#,
            scale.path(points),
            PALETTE[i % PALETTE.len()]
        )?;
    }

    // Axes
    write!(
        svg,
        r##"<line x1="{x}" y1="{top}" x2="{x}" y2="{bottom}" stroke="#1a1a1a" stroke-width="1"/>"##,
        x = MARGIN_LEFT,
        top = MARGIN_TOP,
        bottom = MARGIN_TOP + GRAPH_HEIGHT
    )?;
    write!(
        svg,
        r##"<line x1="{}" y1="{y}" x2="{}" y2="{y}" stroke="#1a1a1a" stroke-width="1"/>"##,
        MARGIN_LEFT,
        WIDTH - MARGIN_RIGHT,
        y = MARGIN_TOP + GRAPH_HEIGHT
    )?;

    write!(
        svg,
        r##"<text x="{}" y="24" text-anchor="middle" font-size="16" font-weight="600" fill="#1a1a1a">{}</text>"##,
        WIDTH / 2.0,
        escape_html(&chart.title)
    )?;
    write!(
        svg,
        r##"<text x="14" y="{y}" text-anchor="middle" font-size="12" fill="#666" transform="rotate(-90 14,{y})">{}</text>"##,
        escape_html(&chart.unit),
        y = HEIGHT / 2.0
    )?;

    for i in 0..=X_LABEL_INTERVALS {
        let offset = (i as f64 / X_LABEL_INTERVALS as f64 * scale.time_range) as i64;
        let time_ms = min_time + offset;
        let label = DateTime::from_timestamp_millis(time_ms)
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        write!(
            svg,
            r##"<text x="{:.1}" y="{}" text-anchor="middle" font-size="11" fill="#888">{}</text>"##,
            scale.x(time_ms),
            MARGIN_TOP + GRAPH_HEIGHT + 20.0,
            label
        )?;
    }

    let mut legend: Vec<(&str, &str)> = Vec::new();
    if !cumulative.is_empty() {
        legend.push(("Total", CUMULATIVE_COLOR));
    }
    for (i, (name, points)) in series.iter().enumerate() {
        if !points.is_empty() {
            legend.push((*name, PALETTE[i % PALETTE.len()]));
        }
    }
    let legend_y = HEIGHT - 15.0;
    let mut legend_x = MARGIN_LEFT;
    for (label, color) in legend {
        write!(
            svg,
            r#"<rect x="{}" y="{}" width="12" height="12" fill="{}" rx="2"/>"#,
            legend_x,
            legend_y - 8.0,
            color
        )?;
        write!(
            svg,
            r##"<text x="{}" y="{}" font-size="11" fill="#666">{}</text>"##,
            legend_x + 16.0,
            legend_y,
            escape_html(label)
        )?;
        legend_x += label.chars().count() as f64 * 7.0 + 40.0;
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn empty_chart(title: &str, message: &str) -> Result<String, std::fmt::Error> {
    let mut svg = String::new();
    write!(
        svg,
        r##"<svg viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg" role="img" style="width:100%;max-width:{w}px;height:auto;"><rect width="{w}" height="{h}" fill="#fafafa" rx="12"/><text x="{cx}" y="30" text-anchor="middle" font-size="14" font-weight="600" fill="#1a1a1a">{title}</text><rect x="40" y="50" width="{iw}" height="{ih}" fill="#ffffff" stroke="#e5e5e5" rx="8"/><text x="{cx}" y="{cy}" text-anchor="middle" font-size="13" fill="#888">{message}</text></svg>"##,
        w = WIDTH,
        h = HEIGHT,
        cx = WIDTH / 2.0,
        cy = HEIGHT / 2.0,
        iw = WIDTH - 80.0,
        ih = HEIGHT - 80.0,
        title = escape_html(title),
        message = escape_html(message)
    )?;
    Ok(svg)
}
