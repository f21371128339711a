//! JSON Output

use crate::report::ProfileReport;

/// Generate a prettified JSON report for one code unit.
pub fn generate_json_report(report: &ProfileReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Generate a JSON array holding several reports, in the given order.
pub fn generate_json_reports(reports: &[ProfileReport]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(reports)
}
