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

//! Declarative filter schema and its translation into query parameters.
//!
//! [`FILTER_SCHEMA`] is the single source of truth for every named filter:
//! it generates the command-line flags ([`FilterArgs`]), decides how raw
//! values are coerced ([`coerce`]) and feeds the `describe` catalog.

use std::collections::BTreeMap;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Args, Command, FromArgMatches, value_parser};
use serde::Serialize;
use serde::ser::SerializeMap;

use crate::error::QueryError;

/// How a filter's raw input is turned into its wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterKind {
    #[serde(rename = "string")]
    String,
    /// Comma separated list; repeated flags are merged.
    #[serde(rename = "csv")]
    MultiValue,
    #[serde(rename = "int")]
    Integer,
    #[serde(rename = "bool")]
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterSpec {
    /// Query parameter name understood by the service.
    pub name: &'static str,
    /// Long command-line flag.
    pub flag: &'static str,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub example: &'static str,
    #[serde(rename = "desc")]
    pub description: &'static str,
}

const fn spec(
    name: &'static str,
    flag: &'static str,
    kind: FilterKind,
    example: &'static str,
    description: &'static str,
) -> FilterSpec {
    FilterSpec {
        name,
        flag,
        kind,
        example,
        description,
    }
}

pub const FILTER_SCHEMA: &[FilterSpec] = &[
    spec("date_from", "date-from", FilterKind::String, "2025-12-01", "Open date lower bound (inclusive)"),
    spec("date_to", "date-to", FilterKind::String, "2025-12-31", "Open date upper bound (inclusive)"),
    spec("priorities", "priorities", FilterKind::MultiValue, "P0,P1", "Priority (multi-select)"),
    spec("sample_statuses", "sample-statuses", FilterKind::MultiValue, "Fail,Pass", "Sample status (multi-select)"),
    spec("departments", "departments", FilterKind::MultiValue, "EE,ME", "Department (multi-select)"),
    spec("wfs", "wfs", FilterKind::MultiValue, "1,2,3", "WF (multi-select)"),
    spec("configs", "configs", FilterKind::MultiValue, "R1CASN,R2CBCN", "Config (multi-select)"),
    spec("failed_tests", "failed-tests", FilterKind::MultiValue, "Test A,Test B", "Failed test (multi-select)"),
    spec("test_ids", "test-ids", FilterKind::MultiValue, "Test1,Test2", "Test ID (multi-select)"),
    spec("failure_types", "failure-types", FilterKind::MultiValue, "Spec.,Strife", "Failure type (multi-select)"),
    spec("function_cosmetic", "function-cosmetic", FilterKind::MultiValue, "Function,Cosmetic", "Function/Cosmetic (multi-select)"),
    spec("failed_locations", "failed-locations", FilterKind::MultiValue, "ISB,USB", "Failed location (multi-select)"),
    spec("symptoms", "symptoms", FilterKind::MultiValue, "Rattle lv3", "Symptom (multi-select)"),
    spec("fa_statuses", "fa-statuses", FilterKind::MultiValue, "open,close", "FA status (multi-select)"),
    spec("unit_number", "unit-number", FilterKind::String, "Unit123", "Unit# fuzzy search"),
    spec("sn", "sn", FilterKind::String, "SN001", "SN fuzzy search"),
    spec("fa_search", "fa-search", FilterKind::String, "FA-2025", "FA# fuzzy search"),
    spec("page", "page", FilterKind::Integer, "1", "Page number (issues only)"),
    spec("limit", "limit", FilterKind::Integer, "100", "Page size (issues only)"),
    spec("sort_by", "sort-by", FilterKind::String, "open_date", "Sort field (issues only)"),
    spec("sort_order", "sort-order", FilterKind::String, "DESC", "Sort direction, ASC or DESC (issues only)"),
    spec("includeTrend", "include-trend", FilterKind::Boolean, "false", "Ask filter-statistics to include trend data"),
];

pub fn find_spec(name: &str) -> Option<&'static FilterSpec> {
    FILTER_SCHEMA.iter().find(|spec| spec.name == name)
}

/// A value exactly as the caller supplied it, before coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    Many(Vec<String>),
    Flag(bool),
}

impl RawValue {
    fn texts(&self) -> Vec<&str> {
        match self {
            RawValue::Text(text) => vec![text.as_str()],
            RawValue::Many(items) => items.iter().map(String::as_str).collect(),
            RawValue::Flag(flag) => vec![bool_literal(*flag)],
        }
    }
}

fn bool_literal(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Canonical wire string for `raw`, or `None` when nothing survives and the
/// filter must be left out of the query entirely.
pub fn coerce(kind: FilterKind, raw: &RawValue) -> Option<String> {
    match kind {
        FilterKind::MultiValue => {
            let tokens: Vec<&str> = raw
                .texts()
                .into_iter()
                .flat_map(|text| text.split(','))
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .collect();
            if tokens.is_empty() {
                None
            } else {
                Some(tokens.join(","))
            }
        }
        FilterKind::String | FilterKind::Integer => raw
            .texts()
            .last()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        FilterKind::Boolean => match raw {
            RawValue::Flag(flag) => Some(bool_literal(*flag).to_string()),
            other => {
                let texts = other.texts();
                let text = texts.last()?.trim();
                if text.is_empty() {
                    return None;
                }
                let falsy = ["false", "0", "no"]
                    .iter()
                    .any(|candidate| text.eq_ignore_ascii_case(candidate));
                Some(bool_literal(!falsy).to_string())
            }
        },
    }
}

/// Ordered parameter mapping; re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameters {
    entries: Vec<(String, String)>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.entries
    }
}

impl Serialize for QueryParameters {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Splits a free-form `key=value` override on its first `=`.
pub fn parse_override(item: &str) -> Result<(String, String), QueryError> {
    let (key, value) = item.split_once('=').ok_or_else(|| {
        QueryError::InvalidInput(format!("invalid --filter, expected key=value: {item}"))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(QueryError::InvalidInput(format!(
            "invalid --filter, empty key: {item}"
        )));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Named filters first, in schema order, then overrides in the order given.
/// Overrides therefore win on any key collision.
pub fn assemble(
    named: &BTreeMap<&'static str, RawValue>,
    overrides: &[String],
) -> Result<QueryParameters, QueryError> {
    let mut params = QueryParameters::new();
    for spec in FILTER_SCHEMA {
        let Some(raw) = named.get(spec.name) else {
            continue;
        };
        if let Some(value) = coerce(spec.kind, raw) {
            params.insert(spec.name, value);
        }
    }
    for item in overrides {
        let (key, value) = parse_override(item)?;
        params.insert(key, value);
    }
    Ok(params)
}

const OVERRIDE_ARG: &str = "filter";

impl FilterSpec {
    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name)
            .long(self.flag)
            .help(self.description)
            .help_heading("Filters");
        if self.flag != self.name {
            arg = arg.alias(self.name);
        }
        match self.kind {
            FilterKind::String => arg
                .value_name("TEXT")
                .value_parser(value_parser!(String))
                .action(ArgAction::Set),
            FilterKind::Integer => arg
                .value_name("N")
                .value_parser(value_parser!(String))
                .action(ArgAction::Set),
            FilterKind::MultiValue => arg
                .value_name("A,B")
                .value_parser(value_parser!(String))
                .action(ArgAction::Append),
            FilterKind::Boolean => arg
                .value_name("BOOL")
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true")
                .value_parser(value_parser!(bool))
                .action(ArgAction::Set),
        }
    }
}

/// Filter flags generated from [`FILTER_SCHEMA`], plus the repeatable
/// `--filter key=value` escape hatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    named: BTreeMap<&'static str, RawValue>,
    overrides: Vec<String>,
}

impl FilterArgs {
    pub fn set(&mut self, name: &str, raw: RawValue) -> Result<(), QueryError> {
        let spec = find_spec(name)
            .ok_or_else(|| QueryError::InvalidInput(format!("unknown filter: {name}")))?;
        self.named.insert(spec.name, raw);
        Ok(())
    }

    pub fn push_override(&mut self, item: impl Into<String>) {
        self.overrides.push(item.into());
    }

    pub fn assemble(&self) -> Result<QueryParameters, QueryError> {
        assemble(&self.named, &self.overrides)
    }
}

impl FromArgMatches for FilterArgs {
    fn from_arg_matches(matches: &ArgMatches) -> Result<Self, clap::Error> {
        let mut args = Self::default();
        args.update_from_arg_matches(matches)?;
        Ok(args)
    }

    fn update_from_arg_matches(&mut self, matches: &ArgMatches) -> Result<(), clap::Error> {
        for spec in FILTER_SCHEMA {
            let raw = match spec.kind {
                FilterKind::MultiValue => matches
                    .get_many::<String>(spec.name)
                    .map(|values| RawValue::Many(values.cloned().collect())),
                FilterKind::Boolean => matches.get_one::<bool>(spec.name).copied().map(RawValue::Flag),
                FilterKind::String | FilterKind::Integer => {
                    matches.get_one::<String>(spec.name).cloned().map(RawValue::Text)
                }
            };
            if let Some(raw) = raw {
                self.set(spec.name, raw)
                    .map_err(|err| clap::Error::raw(ErrorKind::ValueValidation, err))?;
            }
        }
        for item in matches.get_many::<String>(OVERRIDE_ARG).into_iter().flatten() {
            self.push_override(item.as_str());
        }
        Ok(())
    }
}

impl Args for FilterArgs {
    fn augment_args(cmd: Command) -> Command {
        let cmd = FILTER_SCHEMA
            .iter()
            .fold(cmd, |cmd, spec| cmd.arg(spec.to_arg()));
        cmd.arg(
            Arg::new(OVERRIDE_ARG)
                .long("filter")
                .value_name("KEY=VALUE")
                .value_parser(value_parser!(String))
                .action(ArgAction::Append)
                .help("Extra query parameter (repeatable); wins over named filters")
                .help_heading("Filters"),
        )
    }

    fn augment_args_for_update(cmd: Command) -> Command {
        Self::augment_args(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashSet;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        filters: FilterArgs,
    }

    fn parse(args: &[&str]) -> QueryParameters {
        let harness = Harness::try_parse_from(std::iter::once("test").chain(args.iter().copied()))
            .expect("arguments should parse");
        harness.filters.assemble().expect("filters should assemble")
    }

    #[test]
    fn schema_names_and_flags_are_unique() {
        let names: HashSet<_> = FILTER_SCHEMA.iter().map(|s| s.name).collect();
        let flags: HashSet<_> = FILTER_SCHEMA.iter().map(|s| s.flag).collect();
        assert_eq!(names.len(), FILTER_SCHEMA.len());
        assert_eq!(flags.len(), FILTER_SCHEMA.len());
    }

    #[test]
    fn multi_value_splits_trims_and_drops_empty_tokens() {
        let raw = RawValue::Many(vec![" P0 , ,P1".into(), "P2,".into()]);
        assert_eq!(
            coerce(FilterKind::MultiValue, &raw).as_deref(),
            Some("P0,P1,P2")
        );
    }

    #[test]
    fn multi_value_with_no_tokens_is_omitted() {
        let raw = RawValue::Many(vec![" , ".into(), "".into()]);
        assert_eq!(coerce(FilterKind::MultiValue, &raw), None);
    }

    #[test]
    fn multi_value_coercion_is_idempotent() {
        for input in ["a,b,c", " x , y ", "Rattle lv3,Click", "1"] {
            let once = coerce(FilterKind::MultiValue, &RawValue::Text(input.into())).unwrap();
            let twice = coerce(FilterKind::MultiValue, &RawValue::Text(once.clone())).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn string_and_integer_pass_through_trimmed() {
        assert_eq!(
            coerce(FilterKind::String, &RawValue::Text("  SN001 ".into())).as_deref(),
            Some("SN001")
        );
        assert_eq!(
            coerce(FilterKind::Integer, &RawValue::Text("abc".into())).as_deref(),
            Some("abc")
        );
        assert_eq!(coerce(FilterKind::String, &RawValue::Text("   ".into())), None);
    }

    #[test]
    fn boolean_emits_literals() {
        assert_eq!(
            coerce(FilterKind::Boolean, &RawValue::Flag(true)).as_deref(),
            Some("true")
        );
        assert_eq!(
            coerce(FilterKind::Boolean, &RawValue::Flag(false)).as_deref(),
            Some("false")
        );
        assert_eq!(
            coerce(FilterKind::Boolean, &RawValue::Text("No".into())).as_deref(),
            Some("false")
        );
    }

    #[test]
    fn omitted_filters_never_appear() {
        let params = parse(&[]);
        assert!(params.is_empty());
    }

    #[test]
    fn flags_follow_schema_kinds() {
        let params = parse(&[
            "--priorities",
            "P0",
            "--priorities",
            "P1, P2",
            "--date-from",
            "2025-12-01",
            "--page",
            "3",
            "--include-trend",
        ]);
        assert_eq!(
            params.as_pairs(),
            &[
                ("date_from".to_string(), "2025-12-01".to_string()),
                ("priorities".to_string(), "P0,P1,P2".to_string()),
                ("page".to_string(), "3".to_string()),
                ("includeTrend".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn explicit_false_is_distinct_from_absent() {
        let params = parse(&["--include-trend=false"]);
        assert_eq!(params.get("includeTrend"), Some("false"));
        let params = parse(&["--sn", "X"]);
        assert_eq!(params.get("includeTrend"), None);
    }

    #[test]
    fn wire_names_are_accepted_as_aliases() {
        let params = parse(&["--date_from", "2025-01-01", "--includeTrend"]);
        assert_eq!(params.get("date_from"), Some("2025-01-01"));
        assert_eq!(params.get("includeTrend"), Some("true"));
    }

    #[test]
    fn overrides_win_regardless_of_argument_order() {
        let before = parse(&["--filter", "configs=Z", "--configs", "A,B"]);
        let after = parse(&["--configs", "A,B", "--filter", "configs=Z"]);
        assert_eq!(before.get("configs"), Some("Z"));
        assert_eq!(after.get("configs"), Some("Z"));
    }

    #[test]
    fn overrides_may_add_unknown_keys() {
        let params = parse(&["--filter", "groupBy = config", "--filter", "x=a=b"]);
        assert_eq!(params.get("groupBy"), Some("config"));
        assert_eq!(params.get("x"), Some("a=b"));
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        let mut args = FilterArgs::default();
        args.push_override("novalue");
        assert!(matches!(args.assemble(), Err(QueryError::InvalidInput(_))));

        let mut args = FilterArgs::default();
        args.push_override("  =value");
        assert!(matches!(args.assemble(), Err(QueryError::InvalidInput(_))));
    }

    #[test]
    fn set_rejects_unknown_filter_names() {
        let mut args = FilterArgs::default();
        assert!(args.set("nope", RawValue::Text("x".into())).is_err());
        args.set("sn", RawValue::Text("SN1".into())).unwrap();
        assert_eq!(args.assemble().unwrap().get("sn"), Some("SN1"));
    }

    #[test]
    fn query_parameters_serialize_as_ordered_object() {
        let mut params = QueryParameters::new();
        params.insert("b", "1");
        params.insert("a", "2");
        params.insert("b", "3");
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"{"b":"3","a":"2"}"#);
    }
}
