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

mod auth;
mod client;
mod config;
mod error;
mod filters;
mod project;
mod render;
mod schema;
mod stats;

use crate::auth::{TerminalPrompter, resolve_credentials};
use crate::client::{ApiClient, Session};
use crate::config::{BASE_URL_ENV, PASSWORD_ENV, Scope, USERNAME_ENV, resolve_base_url, save};
use crate::filters::{FilterArgs, QueryParameters};
use crate::project::{LIST_COLUMNS, Project, Selector, sort_newest_first};
use crate::render::{OutputFormat, parse_columns, render, render_json};
use crate::stats::{ExtractOptions, Row, SAMPLE_SIZE_COLUMNS, SortDirection, StatKind};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "issue-query",
    version,
    about = "Read-only query CLI for the Issue Analyzor service"
)]
struct Cli {
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "More log output on stderr (-v info, -vv debug, -vvv trace); RUST_LOG wins when set"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the supported filters, query methods and stats kinds as JSON (offline)
    Describe,
    /// List uploaded projects, newest first
    Projects {
        #[command(flatten)]
        conn: ConnArgs,
        #[arg(long, alias = "project_key", help = "Only projects with this exact key")]
        project_key: Option<String>,
        #[arg(long, help = "Only projects in this exact phase")]
        phase: Option<String>,
        #[arg(long, help = "Only projects whose name contains TEXT (case-insensitive)")]
        name: Option<String>,
        #[arg(long, value_name = "N", help = "Show at most N projects")]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Issue rows matching the filters (paginated)
    Issues(QueryArgs),
    /// Selectable values per dimension under the current filters
    FilterOptions(QueryArgs),
    /// Overview plus failure rates per dimension
    Analysis(QueryArgs),
    /// Test dimension analysis
    AnalysisTest(QueryArgs),
    /// Cross analysis of two dimensions
    Cross {
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, value_name = "DIMENSION")]
        dimension1: String,
        #[arg(long, value_name = "DIMENSION")]
        dimension2: String,
    },
    /// Raw filter-statistics response
    FilterStats(QueryArgs),
    /// Extract one distribution from filter-statistics
    Stats(StatsArgs),
    /// Sample sizes per waterfall and test
    SampleSizes {
        #[command(flatten)]
        conn: ConnArgs,
        #[command(flatten)]
        project: ProjectArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// WF x test x config failure-rate matrix
    FailureMatrix(QueryArgs),
    /// Persist connection settings to the chosen scope
    Configure {
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long, conflicts_with = "prompt_password")]
        password: Option<String>,
        #[arg(long, help = "Read the password from the terminal without echo")]
        prompt_password: bool,
        #[arg(long, value_name = "SECONDS", help = "Timeout for query requests")]
        timeout_secs: Option<u64>,
    },
    /// Show current configuration (password masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Args, Debug, Clone)]
struct ConnArgs {
    #[arg(
        long,
        env = BASE_URL_ENV,
        value_name = "URL",
        help = "Service base URL (defaults to config, then http://localhost:3000)"
    )]
    base: Option<String>,
    #[arg(long, env = USERNAME_ENV, hide_env_values = true)]
    username: Option<String>,
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    password: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ProjectArgs {
    #[arg(
        long,
        alias = "project_id",
        value_name = "ID",
        help = "Select the project by id (wins over the other selectors)"
    )]
    project_id: Option<String>,
    #[arg(long, alias = "project_key", help = "Select by exact project key, e.g. M60")]
    project_key: Option<String>,
    #[arg(long, help = "Select by exact phase, e.g. P1/DVT/EVT")]
    phase: Option<String>,
    #[arg(
        long,
        alias = "project_name",
        value_name = "TEXT",
        help = "Select by name substring (case-insensitive)"
    )]
    project_name: Option<String>,
}

impl ProjectArgs {
    fn selector(&self) -> Selector {
        Selector {
            id: self.project_id.clone(),
            key: self.project_key.clone(),
            phase: self.phase.clone(),
            name: self.project_name.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct QueryArgs {
    #[command(flatten)]
    conn: ConnArgs,
    #[command(flatten)]
    project: ProjectArgs,
    #[command(flatten)]
    filters: FilterArgs,
}

#[derive(Args, Debug, Clone)]
struct StatsArgs {
    #[command(flatten)]
    query: QueryArgs,
    #[arg(
        long,
        value_name = "KIND",
        help = "Distribution to extract: symptom, wf, config, failed_test, failed_location, failure_type, function_cosmetic, fa_status"
    )]
    kind: String,
    #[arg(long = "match", value_name = "TEXT", help = "Keep rows whose key field contains TEXT")]
    matching: Option<String>,
    #[arg(long, default_value_t = 0, value_name = "N", help = "Keep the first N rows (0 = all)")]
    top: usize,
    #[arg(long, alias = "order_by", value_name = "FIELD", help = "Sort rows by FIELD, e.g. totalCount")]
    order_by: Option<String>,
    #[arg(long, alias = "order_dir", value_enum, default_value_t = SortDirection::Desc)]
    order_dir: SortDirection,
    #[arg(long, value_name = "COL1,COL2", help = "Override table/csv columns")]
    columns: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

/// Logged-in connection shared by every call of one invocation.
struct Remote {
    client: ApiClient,
    session: Session,
}

impl Remote {
    fn get(&self, path: &str, params: &QueryParameters) -> Result<Value> {
        Ok(self.client.get_data(&self.session, path, params)?)
    }

    fn projects(&self) -> Result<Vec<Project>> {
        let projects = project::fetch_all(|params| {
            self.client.get_data(&self.session, "/api/projects", params)
        })?;
        tracing::debug!(count = projects.len(), "listed projects");
        Ok(projects)
    }

    fn select_project(&self, args: &ProjectArgs) -> Result<Project> {
        let projects = self.projects()?;
        let project = args.selector().select(&projects)?.clone();
        tracing::info!(project_id = %project.id_string(), "selected project");
        Ok(project)
    }
}

#[derive(Serialize)]
struct DataEnvelope<'a> {
    project: &'a Project,
    filters: &'a QueryParameters,
    data: Value,
}

#[derive(Serialize)]
struct StatsEnvelope<'a> {
    project: &'a Project,
    filters: &'a QueryParameters,
    kind: &'static str,
    rows: &'a [Row],
}

#[derive(Serialize)]
struct SampleSizesEnvelope<'a> {
    project: &'a Project,
    sample_sizes: &'a Value,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", single_line(&format!("{err:#}")));
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn single_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Describe => {
            print!("{}", render_json(&schema::catalog(Utc::now()))?);
        }
        Commands::Projects {
            conn,
            project_key,
            phase,
            name,
            limit,
            format,
        } => {
            let remote = connect(&conn)?;
            let projects = remote.projects()?;
            let selector = Selector {
                id: None,
                key: project_key,
                phase,
                name,
            };
            let mut matched = selector.narrow(&projects);
            sort_newest_first(&mut matched);
            if let Some(limit) = limit {
                matched.truncate(limit);
            }

            let rows: Vec<Row> = matched.iter().map(|p| p.list_row()).collect();
            let columns: Vec<String> = LIST_COLUMNS.iter().map(|c| c.to_string()).collect();
            print!("{}", render(&rows, &columns, format, &matched)?);
        }
        Commands::Issues(args) => run_query(&args, "issues", &[])?,
        Commands::FilterOptions(args) => run_query(&args, "filter-options", &[])?,
        Commands::Analysis(args) => run_query(&args, "analysis", &[])?,
        Commands::AnalysisTest(args) => run_query(&args, "analysis/test", &[])?,
        Commands::Cross {
            query,
            dimension1,
            dimension2,
        } => run_query(
            &query,
            "analysis/cross",
            &[("dimension1", &dimension1), ("dimension2", &dimension2)],
        )?,
        Commands::FilterStats(args) => run_query(&args, "filter-statistics", &[])?,
        Commands::FailureMatrix(args) => run_query(&args, "failure-rate-matrix", &[])?,
        Commands::Stats(args) => run_stats(&args)?,
        Commands::SampleSizes {
            conn,
            project,
            format,
        } => {
            let remote = connect(&conn)?;
            let project = remote.select_project(&project)?;
            let path = format!("/api/projects/{}/sample-sizes", project.id_string());
            let data = remote.get(&path, &QueryParameters::new())?;
            let rows = stats::sample_size_rows(&data)?;
            let columns: Vec<String> = SAMPLE_SIZE_COLUMNS.iter().map(|c| c.to_string()).collect();
            let envelope = SampleSizesEnvelope {
                project: &project,
                sample_sizes: &data,
            };
            print!("{}", render(&rows, &columns, format, &envelope)?);
        }
        Commands::Configure {
            scope,
            base_url,
            username,
            password,
            prompt_password,
            timeout_secs,
        } => {
            let cwd = working_dir()?;
            let mut existing = config::load_scope(scope.into(), &cwd)?;
            if let Some(url) = base_url {
                existing.base_url = Some(url);
            }
            if let Some(user) = username {
                existing.username = Some(user);
            }
            if prompt_password {
                let typed = rpassword::prompt_password("Password: ").context("reading password")?;
                existing.password = Some(typed);
            } else if let Some(pass) = password {
                existing.password = Some(pass);
            }
            if let Some(secs) = timeout_secs {
                existing.timeout_secs = Some(secs);
            }
            existing.query_timeout()?;

            let path = save(scope.into(), &existing, &cwd)?;
            println!("Saved configuration to {}", path.display());
        }
        Commands::ConfigShow => {
            let merged = config::load(&working_dir()?)?;
            print!("{}", render_json(&merged.masked())?);
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            match shell {
                CompletionShell::Bash => {
                    generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Zsh => {
                    generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Fish => {
                    generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
                }
            }
        }
    }

    Ok(())
}

/// Needed only by commands that read the local config scope.
fn working_dir() -> Result<PathBuf> {
    std::env::current_dir().context("reading current directory")
}

/// Resolves base URL and credentials, then logs in once.
fn connect(conn: &ConnArgs) -> Result<Remote> {
    let config = config::load(&working_dir()?)?;
    let base_url = resolve_base_url(conn.base.as_deref(), &config);
    let mut client = ApiClient::new(&base_url)?;
    tracing::info!(base_url = %client.base_url(), "using service");
    if let Some(timeout) = config.query_timeout()? {
        client = client.with_query_timeout(timeout);
    }

    let credentials = resolve_credentials(
        conn.username.as_deref(),
        conn.password.as_deref(),
        &config,
        &mut TerminalPrompter,
    )?
    .credentials;
    let session = client.login(&credentials.username, &credentials.password)?;
    Ok(Remote { client, session })
}

/// Project-scoped GET whose response is printed as the JSON envelope.
/// `extra` parameters are applied after the filters.
fn run_query(args: &QueryArgs, endpoint: &str, extra: &[(&str, &str)]) -> Result<()> {
    let mut params = args.filters.assemble()?;
    for (key, value) in extra {
        params.insert(*key, *value);
    }

    let remote = connect(&args.conn)?;
    let project = remote.select_project(&args.project)?;
    let path = format!("/api/projects/{}/{endpoint}", project.id_string());
    let data = remote.get(&path, &params)?;

    let envelope = DataEnvelope {
        project: &project,
        filters: &params,
        data,
    };
    print!("{}", render_json(&envelope)?);
    Ok(())
}

fn run_stats(args: &StatsArgs) -> Result<()> {
    let kind = StatKind::from_name(&args.kind)?;
    let params = args.query.filters.assemble()?;
    let columns = args
        .columns
        .as_deref()
        .map(parse_columns)
        .filter(|cols| !cols.is_empty())
        .unwrap_or_else(|| kind.default_columns());

    let remote = connect(&args.query.conn)?;
    let project = remote.select_project(&args.query.project)?;
    let path = format!("/api/projects/{}/filter-statistics", project.id_string());
    let data = remote.get(&path, &params)?;

    let options = ExtractOptions {
        matching: args.matching.clone(),
        sort_field: args.order_by.clone(),
        direction: args.order_dir,
        top: args.top,
    };
    let rows = stats::extract(&data, kind, &options)?;
    let envelope = StatsEnvelope {
        project: &project,
        filters: &params,
        kind: kind.name(),
        rows: &rows,
    };
    print!("{}", render(&rows, &columns, args.format, &envelope)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stats_flags_parse() {
        let cli = Cli::try_parse_from([
            "issue-query",
            "stats",
            "--project-key",
            "M60",
            "--kind",
            "failed_location",
            "--match",
            "isb",
            "--top",
            "5",
            "--order_by",
            "totalCount",
            "--order-dir",
            "asc",
            "--configs",
            "R1CASN",
            "--configs",
            "R2CBCN",
            "--include-trend",
            "--format",
            "csv",
        ])
        .unwrap();
        let Commands::Stats(args) = cli.command else {
            panic!("expected stats");
        };
        assert_eq!(args.kind, "failed_location");
        assert_eq!(args.matching.as_deref(), Some("isb"));
        assert_eq!(args.top, 5);
        assert_eq!(args.order_by.as_deref(), Some("totalCount"));
        assert_eq!(args.order_dir, SortDirection::Asc);
        assert_eq!(args.format, OutputFormat::Csv);
        assert_eq!(args.query.project.project_key.as_deref(), Some("M60"));

        let params = args.query.filters.assemble().unwrap();
        assert_eq!(params.get("configs"), Some("R1CASN,R2CBCN"));
        assert_eq!(params.get("includeTrend"), Some("true"));
    }

    #[test]
    fn cross_requires_both_dimensions() {
        let err = Cli::try_parse_from(["issue-query", "cross", "--dimension1", "wf"]);
        assert!(err.is_err());
    }

    #[test]
    fn verbose_is_global_and_counted() {
        let cli = Cli::try_parse_from(["issue-query", "describe", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn error_chain_is_flattened() {
        assert_eq!(
            single_line("unexpected response: {\n  \"a\": 1\n}\n"),
            "unexpected response: { \"a\": 1 }"
        );
    }
}
