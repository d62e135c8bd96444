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

use thiserror::Error;

/// Every way a single invocation can fail. None of these are recovered from;
/// they all bubble up to `main` and end the process with a non-zero status.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("missing username/password")]
    MissingCredentials,
    #[error("login failed: {0}")]
    AuthenticationFailed(String),
    #[error("project_id not found: {0}")]
    ProjectNotFound(String),
    #[error("no project matches selection criteria")]
    NoMatchingProject,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unexpected response: {0}")]
    UnexpectedShape(String),
    #[error("request failed: {0}")]
    TransportFailure(String),
    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}
