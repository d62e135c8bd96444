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

use std::error::Error as _;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderValue};
use serde_json::{Value, json};

use crate::error::QueryError;
use crate::filters::QueryParameters;

pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(120);

const USER_AGENT: &str = concat!("issue-query/", env!("CARGO_PKG_VERSION"));

/// Bearer token obtained from one login. Read-only for the rest of the run.
#[derive(Debug, Clone)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    query_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends in '/'.
        let normalized = format!("{}/", base_url.trim().trim_end_matches('/'));
        let parsed = Url::parse(&normalized)
            .with_context(|| format!("parsing base URL `{base_url}`"))?;
        let http = Client::builder()
            .user_agent(HeaderValue::from_static(USER_AGENT))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            base_url: parsed,
            http,
            query_timeout: QUERY_TIMEOUT,
        })
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, QueryError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| QueryError::InvalidInput(format!("joining path `{path}`: {err}")))
    }

    /// Exchanges credentials for a bearer token. The service answers with
    /// `{"data": {"token": ...}}`; anything else is an authentication failure.
    pub fn login(&self, username: &str, password: &str) -> Result<Session, QueryError> {
        let url = self.url("/api/auth/login")?;
        tracing::debug!(%url, username, "logging in");

        let response = self
            .http
            .post(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&json!({ "username": username, "password": password }))
            .timeout(LOGIN_TIMEOUT)
            .send()
            .map_err(transport_failure)?;
        let (status, text) = read_body(response)?;

        if !status.is_success() {
            return Err(QueryError::AuthenticationFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        let body: Option<Value> = serde_json::from_str(&text).ok();
        let token = body
            .as_ref()
            .and_then(|b| b.get("data"))
            .and_then(|d| d.get("token"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => {
                tracing::info!("login succeeded");
                Ok(Session::new(token))
            }
            None => Err(QueryError::AuthenticationFailed(
                body.map(|b| b.to_string()).unwrap_or(text),
            )),
        }
    }

    /// GETs `path` with `params` as the query string and unwraps the
    /// `{success, data}` envelope, returning `data`.
    pub fn get_data(
        &self,
        session: &Session,
        path: &str,
        params: &QueryParameters,
    ) -> Result<Value, QueryError> {
        let url = self.url(path)?;
        tracing::debug!(%url, params = params.len(), "GET");

        let response = self
            .http
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .bearer_auth(session.token())
            .query(params.as_pairs())
            .timeout(self.query_timeout)
            .send()
            .map_err(transport_failure)?;
        let (status, text) = read_body(response)?;

        if !status.is_success() {
            return Err(rejection(status, &text));
        }

        let body: Value = serde_json::from_str(&text).map_err(|_| {
            QueryError::UnexpectedShape(format!("non-JSON response from {path}: {}", preview(&text)))
        })?;
        if !body.get("success").is_some_and(is_truthy) {
            return Err(QueryError::UnexpectedShape(preview(&body.to_string())));
        }
        match body {
            Value::Object(mut envelope) => Ok(envelope.remove("data").unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        }
    }
}

fn read_body(response: Response) -> Result<(StatusCode, String), QueryError> {
    let status = response.status();
    let text = response.text().map_err(transport_failure)?;
    Ok((status, text))
}

fn transport_failure(err: reqwest::Error) -> QueryError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    QueryError::TransportFailure(message)
}

/// Non-2xx: the service's error envelope when there is one, otherwise a
/// plain transport failure.
fn rejection(status: StatusCode, text: &str) -> QueryError {
    let Ok(body) = serde_json::from_str::<Value>(text) else {
        return QueryError::TransportFailure(format!("HTTP {}", status));
    };
    let message = body
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    QueryError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
