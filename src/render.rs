//! Results presentation: the HTML page the browser is routed to after a run,
//! plus the table/CSV/JSON renderings used by the CLI.

use std::io::Write;
use std::path::Path;

use reportscope_core_types::{ReportResult, RESULT_COLUMNS};
use reportscope_result_store::StoredResults;

use crate::errors::AppResult;

/// Negative filter: rows whose last action AND its author both match are
/// dropped. Filters with either side empty are inert.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExcludeFilter {
    pub action: String,
    pub author: String,
}

impl ExcludeFilter {
    /// Parses the CLI form `"Action:author"`. The author is everything after
    /// the first colon, so action names may not contain one.
    pub fn parse(raw: &str) -> Option<Self> {
        let (action, author) = raw.split_once(':')?;
        let action = action.trim();
        let author = author.trim();
        if action.is_empty() || author.is_empty() {
            return None;
        }
        Some(Self {
            action: action.to_string(),
            author: author.to_string(),
        })
    }

    fn matches(&self, row: &ReportResult) -> bool {
        row.last_action.as_deref() == Some(self.action.as_str())
            && row.last_action_author.as_deref() == Some(self.author.as_str())
    }
}

/// Applies the negative filters, keeping row order.
pub fn apply_filters<'a>(
    rows: &'a [ReportResult],
    filters: &[ExcludeFilter],
) -> Vec<&'a ReportResult> {
    rows.iter()
        .filter(|row| !filters.iter().any(|f| f.matches(row)))
        .collect()
}

/// Fixed-width text table for terminal output.
pub fn render_table(rows: &[&ReportResult]) -> String {
    let mut widths: Vec<usize> = RESULT_COLUMNS.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, field) in row.rendered_fields().iter().enumerate() {
            widths[i] = widths[i].max(field.chars().count());
        }
    }

    let mut out = String::new();
    let mut line = |fields: &[&str]| {
        let mut parts = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            parts.push(format!("{:<width$}", field, width = widths[i]));
        }
        out.push_str(parts.join("  ").trim_end());
        out.push('\n');
    };

    line(&RESULT_COLUMNS);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let rule_refs: Vec<&str> = rule.iter().map(String::as_str).collect();
    line(&rule_refs);
    for row in rows {
        line(&row.rendered_fields());
    }
    out
}

pub fn write_csv<W: Write>(writer: W, rows: &[&ReportResult]) -> AppResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(RESULT_COLUMNS)?;
    for row in rows {
        csv.write_record(row.rendered_fields())?;
    }
    csv.flush()?;
    Ok(())
}

pub fn render_json(rows: &[&ReportResult]) -> AppResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

fn esc(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders the static results page and writes it to `path`. The page is what
/// the post-run tab routing navigates to.
pub fn write_results_page(path: &Path, results: &StoredResults) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut body = String::new();
    body.push_str("<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    body.push_str("<title>Scrape Results</title>\n<style>\n");
    body.push_str(
        "body{font-family:sans-serif;margin:2em}table{border-collapse:collapse;width:100%}\n\
         th,td{border:1px solid #ccc;padding:4px 8px;text-align:left;font-size:13px}\n\
         th{background:#f0f0f0}tr:nth-child(even){background:#fafafa}\n",
    );
    body.push_str("</style>\n</head>\n<body>\n");
    body.push_str(&format!(
        "<h1>Scrape Results</h1>\n<p>{} report(s), captured {}</p>\n",
        results.rows.len(),
        esc(&format_ts(results.ts_ms)),
    ));
    body.push_str("<table>\n<thead><tr>");
    for col in RESULT_COLUMNS {
        body.push_str(&format!("<th>{}</th>", esc(col)));
    }
    body.push_str("</tr></thead>\n<tbody>\n");
    for row in &results.rows {
        body.push_str("<tr>");
        for field in row.rendered_fields() {
            body.push_str(&format!("<td>{}</td>", esc(field)));
        }
        body.push_str("</tr>\n");
    }
    body.push_str("</tbody>\n</table>\n</body>\n</html>\n");

    std::fs::write(path, body)?;
    Ok(())
}

fn format_ts(ts_ms: i64) -> String {
    use chrono::TimeZone;
    match chrono::Utc.timestamp_millis_opt(ts_ms) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => ts_ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportscope_core_types::WorkItem;

    fn row(id: &str, action: Option<&str>, author: Option<&str>) -> ReportResult {
        let mut r = ReportResult::failed(&WorkItem::parse(id).unwrap());
        r.last_action = action.map(str::to_string);
        r.last_action_author = author.map(str::to_string);
        r
    }

    #[test]
    fn filter_requires_both_sides_to_match() {
        let rows = vec![
            row("1", Some("Bug triaged"), Some("alice")),
            row("2", Some("Bug triaged"), Some("bob")),
            row("3", Some("Comment added"), Some("alice")),
            row("4", None, None),
        ];
        let filters = vec![ExcludeFilter::parse("Bug triaged:alice").unwrap()];
        let kept = apply_filters(&rows, &filters);
        let ids: Vec<&str> = kept.iter().map(|r| r.report_id.as_str()).collect();
        assert_eq!(ids, ["2", "3", "4"]);
    }

    #[test]
    fn filter_never_matches_missing_fields() {
        let rows = vec![row("1", None, Some("alice"))];
        let filters = vec![ExcludeFilter::parse("N/A:alice").unwrap()];
        assert_eq!(apply_filters(&rows, &filters).len(), 1);
    }

    #[test]
    fn filter_parse_rejects_incomplete_specs() {
        assert!(ExcludeFilter::parse("no-colon").is_none());
        assert!(ExcludeFilter::parse(":author").is_none());
        assert!(ExcludeFilter::parse("action: ").is_none());
        let f = ExcludeFilter::parse(" Bug triaged : alice ").unwrap();
        assert_eq!(f.action, "Bug triaged");
        assert_eq!(f.author, "alice");
    }

    #[test]
    fn table_renders_header_and_sentinels() {
        let rows = vec![row("42", Some("Bug triaged"), None)];
        let refs: Vec<&ReportResult> = rows.iter().collect();
        let table = render_table(&refs);
        assert!(table.starts_with("reportId"));
        assert!(table.contains("Bug triaged"));
        assert!(table.contains("N/A"));
    }

    #[test]
    fn csv_has_one_record_per_row_plus_header() {
        let rows = vec![row("1", None, None), row("2", None, None)];
        let refs: Vec<&ReportResult> = rows.iter().collect();
        let mut buf = Vec::new();
        write_csv(&mut buf, &refs).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().starts_with("reportId,status"));
    }

    #[test]
    fn results_page_escapes_html() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.html");
        let mut r = row("1", None, None);
        r.title = Some("<script>alert(1)</script>".into());
        let stored = StoredResults {
            rows: vec![r],
            count: 1,
            ts_ms: 1_700_000_000_000,
        };
        write_results_page(&path, &stored).unwrap();
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
