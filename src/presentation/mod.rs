// Presentation layer - CLI surface and report renderers
use crate::domain::error::ReportError;
use tera::Tera;

pub mod cli;
pub mod html;
pub mod junit;
pub mod svg;

const REPORT_TEMPLATE: &str = include_str!("templates/report.html");
const JUNIT_TEMPLATE: &str = include_str!("templates/junit.xml");

/// Template engine with the report documents registered. Both names carry an
/// autoescaped suffix, so every interpolated value is escaped unless marked `safe`.
pub fn templates() -> Result<Tera, ReportError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![("report.html", REPORT_TEMPLATE), ("junit.xml", JUNIT_TEMPLATE)])?;
    Ok(tera)
}
