//! pginspect - read-only PostgreSQL internals inspector.
//!
//! Usage:
//!   pginspect list                              # show the query catalog
//!   pginspect run buffer_cache                  # run one catalog query
//!   pginspect run relation_buffers -t orders    # query that takes a target
//!   pginspect waits                             # lock wait graph + deadlock candidates
//!
//! Connection settings come from flags or the usual PG* environment variables.
//! Exit codes: 0 success, 1 connection failure, 2 permission failure,
//! 3 query/object-not-found failure.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, debug, warn};
use tracing_subscriber::EnvFilter;

use pginspect::config::{ConnectionConfig, SslMode};
use pginspect::inspector::{InspectError, Inspector, QueryCatalog};
use pginspect::render::{OutputFormat, render_catalog, render_result, render_wait_report};
use pginspect::waitgraph::WaitGraph;

/// Read-only PostgreSQL internals inspector.
#[derive(Parser)]
#[command(name = "pginspect", about = "Read-only PostgreSQL internals inspector", version)]
struct Args {
    /// Server host name or socket directory.
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    host: String,

    /// Server port.
    #[arg(short, long, env = "PGPORT", default_value_t = 5432)]
    port: u16,

    /// Role to connect as. Default: $USER.
    #[arg(short = 'U', long, env = "PGUSER")]
    user: Option<String>,

    /// Password for the role.
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database to connect to. Default: same as the role.
    #[arg(short, long, env = "PGDATABASE")]
    dbname: Option<String>,

    /// TLS mode: disable, allow, prefer, require, verify-ca, verify-full.
    #[arg(long, env = "PGSSLMODE", default_value = "prefer", value_parser = parse_sslmode)]
    sslmode: SslMode,

    /// Connection timeout in seconds.
    #[arg(long, env = "PGCONNECT_TIMEOUT", default_value_t = 10)]
    connect_timeout: u64,

    /// Per-statement timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the catalog of introspection queries.
    List,
    /// Run one catalog query.
    Run {
        /// Query name (see `list`).
        query: String,
        /// Relation or index name for queries that take a target.
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Build the lock wait graph and report deadlock candidates.
    Waits,
}

fn parse_sslmode(s: &str) -> Result<SslMode, String> {
    SslMode::from_libpq(s).ok_or_else(|| format!("invalid sslmode '{}'", s))
}

/// Initializes the tracing subscriber on stderr.
/// pginspect logs at INFO by default, -q shows errors only.
/// Other crates follow RUST_LOG.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("pginspect={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<ConnectionConfig, InspectError> {
    let user = match args.user.clone() {
        Some(user) => user,
        None => std::env::var("USER")
            .map_err(|_| InspectError::connection("PGUSER or USER not set"))?,
    };
    let mut config = ConnectionConfig::new(user)
        .with_statement_timeout(Duration::from_secs(args.timeout));
    config.host = args.host.clone();
    config.port = args.port;
    if let Some(ref dbname) = args.dbname {
        config.dbname = dbname.clone();
    }
    config.password = args.password.clone().filter(|p| !p.is_empty());
    config.ssl_mode = args.sslmode;
    config.connect_timeout = Duration::from_secs(args.connect_timeout);
    Ok(config)
}

fn render_failed(what: &str, e: serde_json::Error) -> InspectError {
    InspectError::query(what, format!("rendering failed: {}", e))
}

fn execute(args: &Args, catalog: Arc<QueryCatalog>) -> Result<String, InspectError> {
    if let Command::List = args.command {
        return render_catalog(&catalog, args.format).map_err(|e| render_failed("list", e));
    }

    let config = build_config(args)?;
    debug!(config = ?config, "connecting");
    let mut inspector = Inspector::connect(&config, catalog)?;

    match &args.command {
        Command::Run { query, target } => {
            let result = inspector.run(query, target.as_deref())?;
            render_result(&result, args.format).map_err(|e| render_failed(query, e))
        }
        Command::Waits => {
            let rows = inspector.lock_snapshot()?;
            let graph = WaitGraph::from_snapshot(&rows)?;
            let report = graph.report();
            if report.has_deadlock_candidates() {
                warn!(
                    cycles = report.cycles.len(),
                    "deadlock candidates in lock snapshot"
                );
            }
            render_wait_report(&report, args.format).map_err(|e| render_failed("waits", e))
        }
        Command::List => Ok(String::new()),
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    // Built once and shared read-only by every inspector.
    let catalog = Arc::new(QueryCatalog::builtin());

    match execute(&args, catalog) {
        Ok(output) => print!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_target() {
        let args = Args::try_parse_from([
            "pginspect",
            "--host",
            "db1",
            "-U",
            "monitor",
            "--timeout",
            "5",
            "run",
            "relation_buffers",
            "-t",
            "public.orders",
        ])
        .unwrap();
        match args.command {
            Command::Run { ref query, ref target } => {
                assert_eq!(query, "relation_buffers");
                assert_eq!(target.as_deref(), Some("public.orders"));
            }
            _ => panic!("expected run"),
        }
        let config = build_config(&args).unwrap();
        assert_eq!(config.host, "db1");
        assert_eq!(config.user, "monitor");
        assert_eq!(config.statement_timeout, Duration::from_secs(5));
    }

    #[test]
    fn cli_rejects_unknown_sslmode() {
        let parsed = Args::try_parse_from(["pginspect", "--sslmode", "sometimes", "waits"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn cli_accepts_libpq_sslmodes() {
        let args = Args::try_parse_from(["pginspect", "--sslmode", "verify-full", "waits"]).unwrap();
        assert_eq!(args.sslmode, SslMode::Require);
    }

    #[test]
    fn list_needs_no_connection() {
        let args = Args::try_parse_from(["pginspect", "--format", "json", "list"]).unwrap();
        let out = execute(&args, Arc::new(QueryCatalog::builtin())).unwrap();
        assert!(out.contains("\"lock_snapshot\""));
    }
}
