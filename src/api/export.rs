//! CSV export of a job's results.

use crate::model::DomainResult;

pub const CSV_HEADER: &str = "domain,status,faviconUrl,error,tries";

/// Render results as CSV, one row per result in the given order.
/// Absent URLs and errors become empty fields.
pub fn results_csv(results: &[DomainResult]) -> String {
    let mut out = String::with_capacity(64 * (results.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for r in results {
        let fields = [
            csv_escape(&r.domain),
            r.status.to_string(),
            csv_escape(r.favicon_url.as_deref().unwrap_or_default()),
            csv_escape(r.error.as_deref().unwrap_or_default()),
            r.tries.to_string(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Quote a field if it contains a comma, quote, CR or LF; double embedded quotes.
fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
