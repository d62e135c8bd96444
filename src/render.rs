// issue-query - read-only CLI for the Issue Analyzor service
// Copyright (C) 2024 The issue-query authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

pub fn value_to_str(value: &Value) -> String {
    match value {
        Value::Null => "".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn cell(row: &Map<String, Value>, column: &str) -> String {
    row.get(column).map(value_to_str).unwrap_or_default()
}

/// Left-justified text table: header, dashed separator, one line per row.
pub fn render_table(rows: &[Map<String, Value>], columns: &[String]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|col| cell(row, col)).collect())
        .collect();
    for row in &cells {
        for (idx, value) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(value.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, columns.iter().map(String::as_str), &widths);
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, dashes.iter().map(String::as_str), &widths);
    for row in &cells {
        push_line(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    for (i, (value, width)) in cells.zip(widths).enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{:<width$}", value, width = *width));
    }
    out.push('\n');
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Comma separated output with a header row in exactly `columns` order.
pub fn render_csv(rows: &[Map<String, Value>], columns: &[String]) -> String {
    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|c| csv_field(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = columns.iter().map(|c| csv_field(&cell(row, c))).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Indented dump of the whole result envelope; non-ASCII is kept as is.
pub fn render_json<T: Serialize + ?Sized>(envelope: &T) -> serde_json::Result<String> {
    let mut text = serde_json::to_string_pretty(envelope)?;
    text.push('\n');
    Ok(text)
}

/// Renders `rows` in the requested format. `envelope` is only used for JSON,
/// which is the one format allowed to show data beyond `columns`.
pub fn render<T: Serialize + ?Sized>(
    rows: &[Map<String, Value>],
    columns: &[String],
    format: OutputFormat,
    envelope: &T,
) -> serde_json::Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(rows, columns)),
        OutputFormat::Csv => Ok(render_csv(rows, columns)),
        OutputFormat::Json => render_json(envelope),
    }
}

/// Splits a `--columns a,b` override, dropping blanks.
pub fn parse_columns(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
