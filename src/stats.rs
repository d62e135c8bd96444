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

//! Extraction of named distributions from a filter-statistics response.

use std::cmp::Ordering;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::render::value_to_str;

/// One element of a distribution; columns depend on the kind.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Symptom,
    Wf,
    Config,
    FailedTest,
    FailedLocation,
    FailureType,
    FunctionCosmetic,
    FaStatus,
}

const METRIC_COLUMNS: [&str; 7] = [
    "totalCount",
    "specCount",
    "strifeCount",
    "specSNCount",
    "strifeSNCount",
    "totalSamples",
    "specFailureRate",
];

impl StatKind {
    pub const ALL: [StatKind; 8] = [
        StatKind::Symptom,
        StatKind::Wf,
        StatKind::Config,
        StatKind::FailedTest,
        StatKind::FailedLocation,
        StatKind::FailureType,
        StatKind::FunctionCosmetic,
        StatKind::FaStatus,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatKind::Symptom => "symptom",
            StatKind::Wf => "wf",
            StatKind::Config => "config",
            StatKind::FailedTest => "failed_test",
            StatKind::FailedLocation => "failed_location",
            StatKind::FailureType => "failure_type",
            StatKind::FunctionCosmetic => "function_cosmetic",
            StatKind::FaStatus => "fa_status",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, QueryError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name.trim())
            .ok_or_else(|| QueryError::InvalidInput(format!("unknown kind: {name}")))
    }

    pub fn json_path(self) -> [&'static str; 2] {
        let leaf = match self {
            StatKind::Symptom => "symptomDistribution",
            StatKind::Wf => "wfDistribution",
            StatKind::Config => "configDistribution",
            StatKind::FailedTest => "failedTestDistribution",
            StatKind::FailedLocation => "failedLocationDistribution",
            StatKind::FailureType => "failureTypeDistribution",
            StatKind::FunctionCosmetic => "functionCosmeticDistribution",
            StatKind::FaStatus => "faStatusDistribution",
        };
        ["statistics", leaf]
    }

    /// Field holding the row's label; the target of `--match`.
    pub fn key_field(self) -> &'static str {
        match self {
            StatKind::Symptom => "symptom",
            StatKind::Wf => "wf",
            StatKind::Config => "config",
            StatKind::FailedTest => "testName",
            StatKind::FailedLocation => "failedLocation",
            StatKind::FailureType => "type",
            StatKind::FunctionCosmetic => "category",
            StatKind::FaStatus => "status",
        }
    }

    pub fn default_columns(self) -> Vec<String> {
        std::iter::once(self.key_field())
            .chain(METRIC_COLUMNS)
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub matching: Option<String>,
    pub sort_field: Option<String>,
    pub direction: SortDirection,
    /// Zero keeps every row.
    pub top: usize,
}

/// Pulls the `kind` distribution out of `body`, then filters, sorts and
/// truncates it, always in that order.
pub fn extract(body: &Value, kind: StatKind, opts: &ExtractOptions) -> Result<Vec<Row>, QueryError> {
    let mut rows = distribution_rows(body, kind)?;

    if let Some(needle) = opts.matching.as_deref() {
        let needle = needle.trim().to_lowercase();
        let key_field = kind.key_field();
        rows.retain(|row| {
            let label = row.get(key_field).map(value_to_str).unwrap_or_default();
            label.trim().to_lowercase().contains(&needle)
        });
    }

    if let Some(field) = opts.sort_field.as_deref() {
        sort_rows(&mut rows, field, opts.direction);
    }

    if opts.top > 0 {
        rows.truncate(opts.top);
    }

    tracing::debug!(kind = kind.name(), rows = rows.len(), "extracted distribution");
    Ok(rows)
}

fn distribution_rows(body: &Value, kind: StatKind) -> Result<Vec<Row>, QueryError> {
    let mut current = body;
    for key in kind.json_path() {
        match current.as_object().and_then(|map| map.get(key)) {
            Some(next) => current = next,
            None => return Ok(Vec::new()),
        }
    }

    match current {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row.clone()),
                other => Err(QueryError::UnexpectedShape(format!(
                    "{} row is not an object: {other}",
                    kind.name()
                ))),
            })
            .collect(),
        other => Err(QueryError::UnexpectedShape(format!(
            "unexpected stats rows for {}: {other}",
            kind.name()
        ))),
    }
}

/// Stable sort on `field`. Rows without the field (or with `null`) always
/// end up last, whichever direction is requested.
pub fn sort_rows(rows: &mut [Row], field: &str, direction: SortDirection) {
    rows.sort_by(|a, b| {
        let a = a.get(field).filter(|v| !v.is_null());
        let b = b.get(field).filter(|v| !v.is_null());
        match (a, b) {
            (Some(a), Some(b)) => match direction {
                SortDirection::Asc => compare_values(a, b),
                SortDirection::Desc => compare_values(b, a),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) if type_rank(x) == type_rank(y) => x.to_string().cmp(&y.to_string()),
        (x, y) => type_rank(x).cmp(&type_rank(y)),
    }
}

pub const SAMPLE_SIZE_COLUMNS: [&str; 4] = ["waterfall", "test_name", "tests_count", "config_samples_keys"];

/// Summarises a sample-sizes payload into one row per waterfall/test pair.
pub fn sample_size_rows(data: &Value) -> Result<Vec<Row>, QueryError> {
    let items = match data {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(QueryError::UnexpectedShape(format!(
                "unexpected sample-sizes payload: {other}"
            )));
        }
    };

    items
        .iter()
        .map(|item| {
            let record = item.as_object().ok_or_else(|| {
                QueryError::UnexpectedShape(format!("sample-size entry is not an object: {item}"))
            })?;
            let field = |name: &str| record.get(name).cloned().unwrap_or(Value::Null);
            let tests = record.get("tests").and_then(Value::as_array).map_or(0, Vec::len);
            let configs = record
                .get("config_samples")
                .and_then(Value::as_object)
                .map_or(0, Map::len);

            let mut row = Row::new();
            row.insert("waterfall".into(), field("waterfall"));
            row.insert("test_name".into(), field("test_name"));
            row.insert("tests_count".into(), tests.into());
            row.insert("config_samples_keys".into(), configs.into());
            Ok(row)
        })
        .collect()
}
