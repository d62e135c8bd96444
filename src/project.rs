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

//! Project snapshots and the rules for picking one of them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::filters::QueryParameters;
use crate::render::value_to_str;

/// Rows requested per `GET /api/projects` page.
pub const PAGE_SIZE: usize = 200;

/// One uploaded snapshot. Listing fields are kept as raw JSON so an odd
/// value in one record never rejects the whole list; everything else is
/// carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub project_key: Value,
    #[serde(default)]
    pub phase: Value,
    #[serde(default)]
    pub upload_time: Value,
    #[serde(default)]
    pub file_name: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const LIST_COLUMNS: [&str; 6] = ["id", "name", "project_key", "phase", "upload_time", "file_name"];

impl Project {
    pub fn id_string(&self) -> String {
        value_to_str(&self.id)
    }

    fn numeric_id(&self) -> i64 {
        self.id_string().trim().parse().unwrap_or(0)
    }

    pub fn name_text(&self) -> String {
        value_to_str(&self.name)
    }

    pub fn key_text(&self) -> String {
        value_to_str(&self.project_key)
    }

    pub fn phase_text(&self) -> String {
        value_to_str(&self.phase)
    }

    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        parse_upload_time(&value_to_str(&self.upload_time))
    }

    /// Sort key for "most recent snapshot": parseable timestamps beat missing
    /// ones, then the larger numeric id, then the id text.
    fn recency(&self) -> (Option<DateTime<Utc>>, i64, String) {
        (self.uploaded_at(), self.numeric_id(), self.id_string())
    }

    pub fn list_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".into(), self.id.clone());
        row.insert("name".into(), self.name.clone());
        row.insert("project_key".into(), self.project_key.clone());
        row.insert("phase".into(), self.phase.clone());
        row.insert("upload_time".into(), self.upload_time.clone());
        row.insert("file_name".into(), self.file_name.clone());
        row
    }
}

pub fn parse_upload_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// One page of the project listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPage {
    pub projects: Vec<Project>,
    /// Size of the whole listing, when the service reports it.
    pub total: Option<usize>,
    /// Page size the service actually applied, when reported.
    pub limit: Option<usize>,
}

fn count_field(map: &Map<String, Value>, key: &str) -> Option<usize> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts the project list bare, wrapped in a `projects` field, or nested
/// under `data`.
pub fn unwrap_projects(payload: Value) -> Result<ProjectPage, QueryError> {
    let (list, total, limit) = match payload {
        Value::Array(items) => (items, None, None),
        Value::Object(mut map) => match map.remove("projects") {
            Some(Value::Array(items)) => (items, count_field(&map, "total"), count_field(&map, "limit")),
            _ => match map.remove("data") {
                Some(inner @ Value::Object(_)) => return unwrap_projects(inner),
                _ => {
                    return Err(QueryError::UnexpectedShape(
                        "unexpected projects payload".into(),
                    ));
                }
            },
        },
        other => {
            return Err(QueryError::UnexpectedShape(format!(
                "unexpected projects payload: {other}"
            )));
        }
    };
    let projects = list
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|err| QueryError::UnexpectedShape(format!("invalid project record: {err}")))
        })
        .collect::<Result<_, _>>()?;
    Ok(ProjectPage {
        projects,
        total,
        limit,
    })
}

/// Walks the paginated listing until `total` is reached, a short or empty
/// page arrives, or the service stops reporting a total.
pub fn fetch_all<F>(mut fetch_page: F) -> Result<Vec<Project>, QueryError>
where
    F: FnMut(&QueryParameters) -> Result<Value, QueryError>,
{
    let mut out = Vec::new();
    let mut page = 1usize;
    loop {
        let mut params = QueryParameters::new();
        params.insert("page", page.to_string());
        params.insert("limit", PAGE_SIZE.to_string());

        let batch = unwrap_projects(fetch_page(&params)?)?;
        let fetched = batch.projects.len();
        out.extend(batch.projects);
        tracing::debug!(page, fetched, total = ?batch.total, "fetched project page");

        let page_size = batch.limit.filter(|l| *l > 0).unwrap_or(PAGE_SIZE);
        match batch.total {
            Some(total) if total > 0 && out.len() < total && fetched > 0 && fetched >= page_size => {
                page += 1;
            }
            _ => break,
        }
    }
    Ok(out)
}

/// Optional selection criteria; blank strings count as not supplied.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub id: Option<String>,
    pub key: Option<String>,
    pub phase: Option<String>,
    pub name: Option<String>,
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Selector {
    /// Narrows by key, phase and name substring, in that order, applying only
    /// the criteria that were supplied. The id is not consulted here.
    pub fn narrow<'a>(&self, projects: &'a [Project]) -> Vec<&'a Project> {
        let mut candidates: Vec<&Project> = projects.iter().collect();
        if let Some(key) = supplied(&self.key) {
            candidates.retain(|p| p.key_text().trim() == key);
        }
        if let Some(phase) = supplied(&self.phase) {
            candidates.retain(|p| p.phase_text().trim() == phase);
        }
        if let Some(name) = supplied(&self.name) {
            let needle = name.to_lowercase();
            candidates.retain(|p| p.name_text().to_lowercase().contains(&needle));
        }
        candidates
    }

    pub fn select<'a>(&self, projects: &'a [Project]) -> Result<&'a Project, QueryError> {
        if let Some(id) = supplied(&self.id) {
            return projects
                .iter()
                .find(|p| p.id_string() == id)
                .ok_or_else(|| QueryError::ProjectNotFound(id.to_string()));
        }
        latest(self.narrow(projects)).ok_or(QueryError::NoMatchingProject)
    }
}

/// Most recent snapshot among `candidates`. Only records sharing the same id
/// text can tie completely; the earliest of those is kept.
pub fn latest<'a>(candidates: Vec<&'a Project>) -> Option<&'a Project> {
    candidates.into_iter().fold(None, |best, project| match best {
        Some(current) if current.recency() >= project.recency() => Some(current),
        _ => Some(project),
    })
}

/// Newest first, using the same ordering as [`latest`].
pub fn sort_newest_first(projects: &mut [&Project]) {
    projects.sort_by(|a, b| b.recency().cmp(&a.recency()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(id: i64, key: &str, phase: &str, name: &str, uploaded: Option<&str>) -> Project {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "project_key": key,
            "phase": phase,
            "upload_time": uploaded,
            "file_name": format!("{name}.xlsx"),
            "status": "active"
        }))
        .unwrap()
    }

    fn fixtures() -> Vec<Project> {
        vec![
            project(1, "M60", "P1", "M60 FA Tracker", Some("2025-01-01T00:00:00Z")),
            project(2, "M60", "P1", "M60 FA Tracker v2", Some("2025-03-01T08:00:00Z")),
            project(3, "M60", "EVT", "M60 EVT", Some("2025-06-01 10:00:00")),
            project(4, "K20", "P1", "K20 Tracker", None),
            project(5, "M60", "P1", "m60 fa tracker (copy)", Some("2025-03-01T08:00:00.000Z")),
            project(6, "M60", "P1", "M60 broken", Some("not a date")),
        ]
    }

    fn select_id(selector: &Selector, projects: &[Project]) -> String {
        selector.select(projects).unwrap().id_string()
    }

    #[test]
    fn id_is_authoritative() {
        let projects = fixtures();
        let selector = Selector {
            id: Some("4".into()),
            key: Some("M60".into()),
            ..Default::default()
        };
        assert_eq!(select_id(&selector, &projects), "4");

        let missing = Selector {
            id: Some("99".into()),
            ..Default::default()
        };
        assert_eq!(
            missing.select(&projects),
            Err(QueryError::ProjectNotFound("99".into()))
        );
    }

    #[test]
    fn latest_upload_wins_and_ties_prefer_larger_id() {
        let projects = fixtures();
        let selector = Selector {
            key: Some("M60".into()),
            phase: Some("P1".into()),
            ..Default::default()
        };
        assert_eq!(select_id(&selector, &projects), "5");
    }

    #[test]
    fn name_is_a_case_insensitive_substring() {
        let projects = fixtures();
        let selector = Selector {
            name: Some("FA TRACKER v2".into()),
            ..Default::default()
        };
        assert_eq!(select_id(&selector, &projects), "2");
    }

    #[test]
    fn unparseable_timestamps_are_never_preferred() {
        let projects = vec![
            project(10, "X", "P1", "a", Some("garbage")),
            project(2, "X", "P1", "b", Some("2020-01-01")),
            project(11, "X", "P1", "c", None),
        ];
        assert_eq!(select_id(&Selector::default(), &projects), "2");
    }

    #[test]
    fn selection_ignores_input_order() {
        let projects = fixtures();
        let selectors = [
            Selector::default(),
            Selector {
                key: Some("M60".into()),
                phase: Some("P1".into()),
                ..Default::default()
            },
            Selector {
                phase: Some("P1".into()),
                ..Default::default()
            },
        ];
        for selector in &selectors {
            let expected = select_id(selector, &projects);
            let mut reversed = projects.clone();
            reversed.reverse();
            assert_eq!(select_id(selector, &reversed), expected);
            let mut rotated = projects.clone();
            rotated.rotate_left(2);
            assert_eq!(select_id(selector, &rotated), expected);
        }
    }

    #[test]
    fn no_candidates_is_an_error() {
        let selector = Selector {
            key: Some("M60".into()),
            phase: Some("DVT".into()),
            ..Default::default()
        };
        assert_eq!(
            selector.select(&fixtures()),
            Err(QueryError::NoMatchingProject)
        );
    }

    #[test]
    fn blank_criteria_are_ignored() {
        let selector = Selector {
            key: Some("  ".into()),
            name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(selector.narrow(&fixtures()).len(), fixtures().len());
    }

    #[test]
    fn unwraps_wrapped_project_lists() {
        let bare = unwrap_projects(json!([{"id": 1, "name": "a"}])).unwrap();
        assert_eq!(bare.projects[0].id_string(), "1");
        assert_eq!(bare.total, None);

        let wrapped = unwrap_projects(json!({"projects": [{"id": "7"}], "total": 41, "limit": 20})).unwrap();
        assert_eq!(wrapped.projects[0].id_string(), "7");
        assert_eq!(wrapped.total, Some(41));
        assert_eq!(wrapped.limit, Some(20));

        let nested =
            unwrap_projects(json!({"data": {"projects": [{"id": 3, "extra": true}], "total": "1"}})).unwrap();
        assert_eq!(nested.projects[0].extra.get("extra"), Some(&json!(true)));
        assert_eq!(nested.total, Some(1));

        assert!(matches!(
            unwrap_projects(json!({"items": []})),
            Err(QueryError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn non_string_listing_fields_do_not_reject_the_list() {
        let page = unwrap_projects(json!([
            {"id": 1, "name": 2024, "project_key": "M60", "phase": 1, "upload_time": null},
            {"id": 2, "name": "ok", "project_key": ["odd"], "phase": "P1",
             "upload_time": "2025-01-01T00:00:00Z"}
        ]))
        .unwrap();
        assert_eq!(page.projects.len(), 2);

        let by_phase = Selector {
            phase: Some("1".into()),
            ..Default::default()
        };
        assert_eq!(select_id(&by_phase, &page.projects), "1");

        let by_name = Selector {
            name: Some("202".into()),
            ..Default::default()
        };
        assert_eq!(select_id(&by_name, &page.projects), "1");
        assert_eq!(page.projects[1].list_row()["project_key"], json!(["odd"]));
    }

    #[test]
    fn non_numeric_ids_still_select_independently_of_order() {
        let raw = |id: &str| -> Project {
            serde_json::from_value(json!({
                "id": id,
                "project_key": "M60",
                "upload_time": "2025-05-05T00:00:00Z"
            }))
            .unwrap()
        };
        let forward = vec![raw("alpha"), raw("beta"), raw("gamma")];
        let mut backward = forward.clone();
        backward.reverse();

        let selector = Selector::default();
        assert_eq!(select_id(&selector, &forward), "gamma");
        assert_eq!(select_id(&selector, &backward), "gamma");
    }

    fn listing_page(ids: std::ops::RangeInclusive<i64>, total: usize, limit: usize) -> Value {
        let projects: Vec<Value> = ids
            .rev()
            .map(|id| {
                let key = if id <= 5 { "OLD" } else { "NEW" };
                json!({"id": id, "project_key": key})
            })
            .collect();
        json!({"projects": projects, "total": total, "page": 1, "limit": limit})
    }

    #[test]
    fn fetch_all_follows_pages_until_total() {
        let mut requested = Vec::new();
        let projects = fetch_all(|params| {
            let page: usize = params.get("page").unwrap().parse().unwrap();
            requested.push((page, params.get("limit").unwrap().to_string()));
            Ok(match page {
                1 => listing_page(6..=25, 25, 20),
                2 => listing_page(1..=5, 25, 20),
                _ => panic!("page {page} should not be requested"),
            })
        })
        .unwrap();

        assert_eq!(projects.len(), 25);
        assert_eq!(requested, vec![(1, "200".to_string()), (2, "200".to_string())]);

        let old = Selector {
            id: Some("3".into()),
            ..Default::default()
        };
        assert_eq!(select_id(&old, &projects), "3");
    }

    #[test]
    fn fetch_all_stops_on_short_page_or_missing_total() {
        let mut calls = 0;
        let projects = fetch_all(|_| {
            calls += 1;
            Ok(listing_page(1..=3, 50, 20))
        })
        .unwrap();
        assert_eq!((projects.len(), calls), (3, 1));

        let mut calls = 0;
        let projects = fetch_all(|_| {
            calls += 1;
            Ok(json!([{"id": 1}, {"id": 2}]))
        })
        .unwrap();
        assert_eq!((projects.len(), calls), (2, 1));

        let err = fetch_all(|_| Err(QueryError::TransportFailure("down".into()))).unwrap_err();
        assert_eq!(err, QueryError::TransportFailure("down".into()));
    }

    #[test]
    fn parses_common_timestamp_shapes() {
        assert!(parse_upload_time("2025-03-01T08:00:00Z").is_some());
        assert!(parse_upload_time("2025-03-01T08:00:00+08:00").is_some());
        assert!(parse_upload_time("2025-03-01 08:00:00.123").is_some());
        assert!(parse_upload_time("2025-03-01").is_some());
        assert!(parse_upload_time("").is_none());
        assert!(parse_upload_time("yesterday").is_none());
    }

    #[test]
    fn newest_first_ordering() {
        let projects = fixtures();
        let mut refs: Vec<&Project> = projects.iter().collect();
        sort_newest_first(&mut refs);
        let ids: Vec<String> = refs.iter().map(|p| p.id_string()).collect();
        assert_eq!(ids, vec!["3", "5", "2", "1", "6", "4"]);
    }
}
