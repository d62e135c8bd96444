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

//! Offline catalog printed by `describe`.
//!
//! Everything here is static: the commands the CLI offers, the filter
//! parameters they accept and the statistic kinds `stats` can extract. It
//! lets scripts discover the query surface without credentials or network.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::filters::{FILTER_SCHEMA, FilterSpec};
use crate::stats::StatKind;

/// One remote capability exposed as a subcommand.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueryMethod {
    pub cmd: &'static str,
    pub endpoint: &'static str,
    pub desc: &'static str,
}

pub const QUERY_METHODS: &[QueryMethod] = &[
    QueryMethod {
        cmd: "projects",
        endpoint: "GET /api/projects",
        desc: "List uploaded project snapshots",
    },
    QueryMethod {
        cmd: "issues",
        endpoint: "GET /api/projects/:id/issues",
        desc: "Issue rows matching the filters (paginated)",
    },
    QueryMethod {
        cmd: "filter-options",
        endpoint: "GET /api/projects/:id/filter-options",
        desc: "Selectable values per dimension under the current filters",
    },
    QueryMethod {
        cmd: "analysis",
        endpoint: "GET /api/projects/:id/analysis",
        desc: "Overview plus failure rates per dimension",
    },
    QueryMethod {
        cmd: "analysis-test",
        endpoint: "GET /api/projects/:id/analysis/test",
        desc: "Test dimension analysis",
    },
    QueryMethod {
        cmd: "cross",
        endpoint: "GET /api/projects/:id/analysis/cross",
        desc: "Cross analysis of two dimensions",
    },
    QueryMethod {
        cmd: "filter-stats",
        endpoint: "GET /api/projects/:id/filter-statistics",
        desc: "Statistics for the filtered issues, including distributions",
    },
    QueryMethod {
        cmd: "stats",
        endpoint: "GET /api/projects/:id/filter-statistics + extract",
        desc: "Extract one distribution from filter-statistics and format it",
    },
    QueryMethod {
        cmd: "sample-sizes",
        endpoint: "GET /api/projects/:id/sample-sizes",
        desc: "Sample sizes per WF, test and config",
    },
    QueryMethod {
        cmd: "failure-matrix",
        endpoint: "GET /api/projects/:id/failure-rate-matrix",
        desc: "WF x test x config failure-rate matrix",
    },
    QueryMethod {
        cmd: "describe",
        endpoint: "(local)",
        desc: "Print the supported filters and query methods",
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct StatKindInfo {
    pub name: &'static str,
    pub json_path: String,
    pub key_field: &'static str,
}

impl From<StatKind> for StatKindInfo {
    fn from(kind: StatKind) -> Self {
        Self {
            name: kind.name(),
            json_path: kind.json_path().join("."),
            key_field: kind.key_field(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub generated_at: String,
    pub query_methods: &'static [QueryMethod],
    pub filter_parameters: &'static [FilterSpec],
    pub stats_kinds: Vec<StatKindInfo>,
}

pub fn catalog(now: DateTime<Utc>) -> Catalog {
    Catalog {
        generated_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        query_methods: QUERY_METHODS,
        filter_parameters: FILTER_SCHEMA,
        stats_kinds: StatKind::ALL.into_iter().map(StatKindInfo::from).collect(),
    }
}
