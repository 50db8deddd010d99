//! Text and JSON rendering of result sets and wait reports.
//!
//! Text tables follow psql's aligned layout: ` | ` between cells, `-+-`
//! in the separator, numbers right-aligned, NULL shown as `-`.

use clap::ValueEnum;
use serde::Serialize;

use crate::fmt::{format_bytes, format_duration, format_percent, normalize_for_display, truncate};
use crate::inspector::{ColumnKind, QueryCatalog, ResultSet, TargetKind, Value};
use crate::waitgraph::WaitReport;

/// Longest text cell shown in a table before truncation.
const MAX_TEXT_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// A rendered cell and whether it is right-aligned.
struct Cell {
    text: String,
    right: bool,
}

impl Cell {
    fn left(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            right: false,
        }
    }

    fn right(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            right: true,
        }
    }
}

fn format_cell(value: &Value, kind: ColumnKind) -> Cell {
    match (value, kind) {
        (Value::Null, _) => Cell::left("-"),
        (Value::Int(v), ColumnKind::Bytes) => Cell::right(format_bytes(*v)),
        (Value::Int(v), ColumnKind::Seconds) => Cell::right(format_duration(*v)),
        (Value::Float(v), ColumnKind::Percent) => Cell::right(format_percent(*v)),
        (Value::Int(v), _) => Cell::right(v.to_string()),
        (Value::Float(v), _) => Cell::right(format!("{:.2}", v)),
        (Value::Bool(v), _) => Cell::left(if *v { "t" } else { "f" }),
        (Value::Text(v), _) => Cell::left(truncate(&normalize_for_display(v), MAX_TEXT_WIDTH)),
    }
}

fn pad(cell: &Cell, width: usize) -> String {
    if cell.right {
        format!("{:>width$}", cell.text, width = width)
    } else {
        format!("{:<width$}", cell.text, width = width)
    }
}

/// Lays out headers and rows as an aligned table (no trailing newline).
fn format_table(headers: &[&str], rows: &[Vec<Cell>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(idx) {
                *w = (*w).max(cell.text.chars().count());
            }
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(
        headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| format!("{:<w$}", h, w = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string(),
    );
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in rows {
        lines.push(
            row.iter()
                .zip(&widths)
                .map(|(cell, w)| pad(cell, *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string(),
        );
    }
    lines.join("\n")
}

fn count_footer(n: usize, singular: &str, plural: &str) -> String {
    if n == 1 {
        format!("(1 {})", singular)
    } else {
        format!("({} {})", n, plural)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Renders a result set as an aligned text table.
pub fn render_table(result: &ResultSet) -> String {
    let headers: Vec<&str> = result.columns.iter().map(|c| c.name).collect();
    let rows: Vec<Vec<Cell>> = result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(&result.columns)
                .map(|(value, column)| format_cell(value, column.kind))
                .collect()
        })
        .collect();

    format!(
        "-- {} @ {}\n{}\n{}\n",
        result.query,
        result.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
        format_table(&headers, &rows),
        count_footer(result.rows.len(), "row", "rows")
    )
}

pub fn render_result(result: &ResultSet, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(render_table(result)),
        OutputFormat::Json => to_json(result),
    }
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    name: &'a str,
    description: &'a str,
    target: TargetKind,
    columns: Vec<&'a str>,
}

/// Lists catalog statements with their description and target.
pub fn render_catalog(
    catalog: &QueryCatalog,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => {
            let entries: Vec<CatalogEntry<'_>> = catalog
                .iter()
                .map(|spec| CatalogEntry {
                    name: spec.name,
                    description: spec.description,
                    target: spec.target,
                    columns: spec.column_names(),
                })
                .collect();
            to_json(&entries)
        }
        OutputFormat::Table => {
            let rows: Vec<Vec<Cell>> = catalog
                .iter()
                .map(|spec| {
                    let target = match spec.target {
                        TargetKind::None => "-",
                        TargetKind::Relation => "relation",
                        TargetKind::Index => "index",
                    };
                    vec![
                        Cell::left(spec.name),
                        Cell::left(target),
                        Cell::left(spec.description),
                    ]
                })
                .collect();
            Ok(format!(
                "{}\n{}\n",
                format_table(&["query", "target", "description"], &rows),
                count_footer(catalog.len(), "query", "queries")
            ))
        }
    }
}

/// Renders a wait report: edge table, blocking tree, deadlock candidates.
pub fn render_wait_text(report: &WaitReport) -> String {
    let mut out = String::new();

    let headers = ["waiting", "blocking", "mode", "held_mode", "object"];
    let rows: Vec<Vec<Cell>> = report
        .edges
        .iter()
        .map(|e| {
            vec![
                Cell::right(e.waiting_pid.to_string()),
                Cell::right(e.blocking_pid.to_string()),
                Cell::left(e.mode.clone()),
                Cell::left(e.held_mode.clone()),
                Cell::left(truncate(e.target(), MAX_TEXT_WIDTH)),
            ]
        })
        .collect();
    out.push_str(&format_table(&headers, &rows));
    out.push('\n');
    out.push_str(&count_footer(report.edges.len(), "edge", "edges"));
    out.push('\n');

    if !report.tree.is_empty() {
        out.push_str("\nblocking tree:\n");
        for node in &report.tree {
            let indent = "  ".repeat(node.depth);
            if node.depth == 1 {
                out.push_str(&format!("{}{} (root)\n", indent, node.pid));
            } else {
                out.push_str(&format!("{}{}\n", indent, node.pid));
            }
        }
    }

    out.push('\n');
    if report.cycles.is_empty() {
        out.push_str("no deadlock candidates\n");
    } else {
        out.push_str("deadlock candidates:\n");
        for cycle in &report.cycles {
            let mut path: Vec<String> = cycle.iter().map(|p| p.to_string()).collect();
            if let Some(first) = cycle.first() {
                path.push(first.to_string());
            }
            out.push_str(&format!("  {}\n", path.join(" -> ")));
        }
    }
    out
}

pub fn render_wait_report(
    report: &WaitReport,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(render_wait_text(report)),
        OutputFormat::Json => to_json(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::QueryCatalog;
    use crate::waitgraph::{LockEdge, WaitGraph};

    fn wal_segments(rows: Vec<Vec<Value>>) -> ResultSet {
        let catalog = QueryCatalog::builtin();
        ResultSet::new(catalog.get("wal_segments").unwrap(), rows)
    }

    fn edge(waiting: i32, blocking: i32) -> LockEdge {
        LockEdge {
            waiting_pid: waiting,
            blocking_pid: blocking,
            object: "relation:5:16384".to_string(),
            relation: Some("public.orders".to_string()),
            mode: "AccessExclusiveLock".to_string(),
            held_mode: "RowExclusiveLock".to_string(),
        }
    }

    #[test]
    fn table_aligns_and_humanizes() {
        let result = wal_segments(vec![
            vec![
                Value::Text("000000010000000000000003".into()),
                Value::Int(16 * 1024 * 1024),
                Value::Text("2026-10-17 09:00:00".into()),
            ],
            vec![
                Value::Text("000000010000000000000002".into()),
                Value::Null,
                Value::Null,
            ],
        ]);
        let text = render_table(&result);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("-- wal_segments @ "));
        assert_eq!(
            lines[1],
            "name                     | size_bytes | modified"
        );
        assert_eq!(
            lines[2],
            "-------------------------+------------+--------------------"
        );
        assert_eq!(
            lines[3],
            "000000010000000000000003 |      16.0M | 2026-10-17 09:00:00"
        );
        assert_eq!(lines[4], "000000010000000000000002 | -          | -");
        assert_eq!(lines[5], "(2 rows)");
    }

    #[test]
    fn empty_result_still_has_header() {
        let text = render_table(&wal_segments(Vec::new()));
        assert!(text.contains("name | size_bytes | modified"));
        assert!(text.ends_with("(0 rows)\n"));
    }

    #[test]
    fn cells_format_by_kind() {
        assert_eq!(format_cell(&Value::Int(185), ColumnKind::Seconds).text, "3m5s");
        assert_eq!(format_cell(&Value::Float(12.34), ColumnKind::Percent).text, "12.3%");
        assert_eq!(format_cell(&Value::Bool(true), ColumnKind::Plain).text, "t");
        assert!(format_cell(&Value::Int(5), ColumnKind::Plain).right);
        assert!(!format_cell(&Value::Text("x".into()), ColumnKind::Plain).right);
    }

    #[test]
    fn json_contains_rows_and_columns() {
        let result = wal_segments(vec![vec![
            Value::Text("000000010000000000000003".into()),
            Value::Int(1024),
            Value::Null,
        ]]);
        let json = render_result(&result, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["query"], "wal_segments");
        assert_eq!(parsed["columns"][1]["name"], "size_bytes");
        assert_eq!(parsed["columns"][1]["kind"], "bytes");
        assert_eq!(parsed["rows"][0][1], 1024);
        assert!(parsed["rows"][0][2].is_null());
    }

    #[test]
    fn wait_text_lists_cycles_closed() {
        let g = WaitGraph::from_edges(vec![edge(1, 2), edge(2, 3), edge(3, 1)]).unwrap();
        let text = render_wait_text(&g.report());
        assert!(text.contains("(3 edges)"));
        assert!(text.contains("deadlock candidates:\n  1 -> 2 -> 3 -> 1\n"));
        assert!(!text.contains("blocking tree"));
    }

    #[test]
    fn wait_text_shows_tree_without_cycles() {
        let g = WaitGraph::from_edges(vec![edge(2, 1), edge(3, 2)]).unwrap();
        let text = render_wait_text(&g.report());
        assert!(text.contains("blocking tree:\n  1 (root)\n    2\n      3\n"));
        assert!(text.contains("public.orders"));
        assert!(text.ends_with("no deadlock candidates\n"));
    }

    #[test]
    fn empty_wait_report() {
        let g = WaitGraph::from_edges(Vec::new()).unwrap();
        let text = render_wait_text(&g.report());
        assert!(text.contains("(0 edges)"));
        assert!(text.contains("no deadlock candidates"));
    }

    #[test]
    fn catalog_listing_names_targets() {
        let catalog = QueryCatalog::builtin();
        let text = render_catalog(&catalog, OutputFormat::Table).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("relation_buffers "))
            .unwrap();
        assert!(line.contains("| relation |"));
        assert!(text.ends_with("(14 queries)\n"));

        let json = render_catalog(&catalog, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 14);
        assert_eq!(parsed[0]["target"], "none");
    }

    #[test]
    fn wait_report_json() {
        let g = WaitGraph::from_edges(vec![edge(1, 2), edge(2, 1)]).unwrap();
        let json = render_wait_report(&g.report(), OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["cycles"][0], serde_json::json!([1, 2]));
        assert_eq!(parsed["edges"][0]["waiting_pid"], 1);
    }
}
