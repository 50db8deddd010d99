//! Read-only inspection client.
//!
//! Runs catalog statements against a live PostgreSQL server:
//! - `pg_buffercache` - shared buffer contents (requires extension)
//! - `pg_stat_bgwriter` / `pg_stat_checkpointer` - buffer write counters
//! - WAL functions and `pg_ls_waldir()` - WAL position and segments
//! - `pg_locks` - heavyweight, advisory and predicate locks
//! - `pg_stat_progress_vacuum` / `pg_stat_user_tables` - vacuum state
//! - `pg_stat_user_indexes` - index usage
//!
//! Each [`Inspector`] owns exactly one connection. A call is one synchronous
//! round trip; failures surface immediately and are never retried.

mod catalog;
mod queries;
mod value;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{Client, NoTls};
use postgres_native_tls::MakeTlsConnector;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, SslMode};
use crate::waitgraph::{GraphError, LockRow};

pub use catalog::{
    Column, ColumnKind, LOCK_SNAPSHOT, QueryCatalog, QuerySpec, SqlText, TargetKind,
};
pub use value::Value;

/// Error type for inspection calls.
#[derive(Debug)]
pub enum InspectError {
    /// Server unreachable, authentication failed or the connection dropped.
    Connection { message: String },
    /// The role lacks access to a catalog view, function or extension.
    Permission { query: String, message: String },
    /// The statement failed: unknown query, absent object, missing extension.
    Query { query: String, message: String },
    /// The lock snapshot could not be turned into a wait graph.
    Graph(GraphError),
}

impl InspectError {
    pub fn connection(message: impl Into<String>) -> Self {
        InspectError::Connection {
            message: message.into(),
        }
    }

    pub fn query(query: impl Into<String>, message: impl Into<String>) -> Self {
        InspectError::Query {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            InspectError::Connection { .. } => 1,
            InspectError::Permission { .. } => 2,
            InspectError::Query { .. } | InspectError::Graph(_) => 3,
        }
    }
}

impl std::fmt::Display for InspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InspectError::Connection { message } => write!(f, "PostgreSQL: {}", message),
            InspectError::Permission { query, message } => {
                write!(f, "{}: permission denied: {}", query, message)
            }
            InspectError::Query { query, message } => write!(f, "{}: {}", query, message),
            InspectError::Graph(e) => write!(f, "wait graph: {}", e),
        }
    }
}

impl std::error::Error for InspectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InspectError::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphError> for InspectError {
    fn from(e: GraphError) -> Self {
        InspectError::Graph(e)
    }
}

/// Which taxonomy bucket a server error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Connection,
    Permission,
    Query,
}

/// Classifies a SQLSTATE.
///
/// Class 08 (connection exception), class 28 (invalid authorization), an
/// unknown database and server shutdown are connection failures. Everything
/// else reported by the server is about the statement itself.
pub fn classify_sqlstate(code: &SqlState) -> ErrorClass {
    if *code == SqlState::INSUFFICIENT_PRIVILEGE {
        return ErrorClass::Permission;
    }
    let raw = code.code();
    if raw.starts_with("08")
        || raw.starts_with("28")
        || *code == SqlState::INVALID_CATALOG_NAME
        || *code == SqlState::ADMIN_SHUTDOWN
        || *code == SqlState::CRASH_SHUTDOWN
        || *code == SqlState::CANNOT_CONNECT_NOW
        || *code == SqlState::TOO_MANY_CONNECTIONS
    {
        return ErrorClass::Connection;
    }
    ErrorClass::Query
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}

/// Maps a driver error raised while running `query` onto the taxonomy.
fn classify_error(query: &str, e: &postgres::Error) -> InspectError {
    let message = format_postgres_error(e);
    let Some(code) = e.code() else {
        // No SQLSTATE: I/O, TLS or a closed connection.
        return InspectError::Connection { message };
    };
    match classify_sqlstate(code) {
        ErrorClass::Connection => InspectError::Connection { message },
        ErrorClass::Permission => InspectError::Permission {
            query: query.to_string(),
            message,
        },
        ErrorClass::Query => InspectError::Query {
            query: query.to_string(),
            message,
        },
    }
}

/// Rows returned by one catalog statement.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    pub query: String,
    pub captured_at: DateTime<Utc>,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(spec: &QuerySpec, rows: Vec<Vec<Value>>) -> Self {
        Self {
            query: spec.name.to_string(),
            captured_at: Utc::now(),
            columns: spec.columns.to_vec(),
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Checks a call's target against what the statement accepts.
fn check_target<'a>(
    spec: &QuerySpec,
    target: Option<&'a str>,
) -> Result<Option<&'a str>, InspectError> {
    match (spec.target, target.map(str::trim)) {
        (TargetKind::None, None) => Ok(None),
        (TargetKind::None, Some(_)) => Err(InspectError::query(
            spec.name,
            "this query does not take a target",
        )),
        (_, None) | (_, Some("")) => Err(InspectError::query(
            spec.name,
            format!(
                "a target {} name is required",
                if spec.target == TargetKind::Index {
                    "index"
                } else {
                    "relation"
                }
            ),
        )),
        (_, Some(name)) => Ok(Some(name)),
    }
}

/// Checks the statement's output columns against the catalog entry.
fn check_columns(spec: &QuerySpec, actual: &[&str]) -> Result<(), InspectError> {
    let expected = spec.column_names();
    if expected.as_slice() == actual {
        Ok(())
    } else {
        Err(InspectError::query(
            spec.name,
            format!(
                "unexpected columns: expected [{}], server returned [{}]",
                expected.join(", "),
                actual.join(", ")
            ),
        ))
    }
}

/// Parses `server_version_num` output such as `160002`.
fn parse_server_version(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok().filter(|v| *v > 0)
}

/// Decides what a failed TLS setup means for `mode`.
///
/// `prefer` carries on without TLS; `require` cannot.
fn tls_setup_failed(mode: SslMode, message: String) -> Result<(), InspectError> {
    match mode {
        SslMode::Require => Err(InspectError::connection(format!("TLS setup: {}", message))),
        SslMode::Prefer | SslMode::Disable => {
            warn!(error = %message, "TLS setup failed, connecting without TLS");
            Ok(())
        }
    }
}

/// TLS connector for `mode`, or `None` for a plain connection.
fn tls_connector(mode: SslMode) -> Result<Option<MakeTlsConnector>, InspectError> {
    if mode == SslMode::Disable {
        return Ok(None);
    }
    match native_tls::TlsConnector::builder().build() {
        Ok(connector) => Ok(Some(MakeTlsConnector::new(connector))),
        Err(e) => tls_setup_failed(mode, e.to_string()).map(|_| None),
    }
}

/// Checks that a targeted statement found its target.
///
/// `regclass` resolves any relation name, so an index statement given a table
/// runs cleanly and returns nothing.
fn check_target_found(
    spec: &QuerySpec,
    target: Option<&str>,
    rows: &[Vec<Value>],
) -> Result<(), InspectError> {
    match (spec.target, target) {
        (TargetKind::Index, Some(name)) if rows.is_empty() => Err(InspectError::query(
            spec.name,
            format!("\"{}\" is not an index", name),
        )),
        _ => Ok(()),
    }
}

/// Inspection client bound to one connection.
pub struct Inspector {
    client: Client,
    catalog: Arc<QueryCatalog>,
    server_version_num: Option<i32>,
    label: String,
}

impl Inspector {
    /// Opens a read-only session and reads the server version.
    pub fn connect(
        config: &ConnectionConfig,
        catalog: Arc<QueryCatalog>,
    ) -> Result<Self, InspectError> {
        let pg_config = config.to_pg_config();
        let connected = match tls_connector(config.ssl_mode)? {
            Some(connector) => pg_config.connect(connector),
            None => pg_config.connect(NoTls),
        };
        let mut client = connected.map_err(|e| InspectError::Connection {
            message: format_postgres_error(&e),
        })?;

        let server_version_num = match client.query_one("SHOW server_version_num", &[]) {
            Ok(row) => row
                .try_get::<_, String>(0)
                .ok()
                .and_then(|v| parse_server_version(&v)),
            Err(e) => {
                warn!(error = %format_postgres_error(&e), "SHOW server_version_num failed");
                None
            }
        };
        if server_version_num.is_none() {
            warn!("server version unknown, using statements for the oldest supported server");
        }

        let label = config.describe();
        info!(server = %label, version = ?server_version_num, "connected");

        Ok(Self {
            client,
            catalog,
            server_version_num,
            label,
        })
    }

    /// Server version as `server_version_num` (e.g. 160002), if it could be read.
    pub fn server_version(&self) -> Option<i32> {
        self.server_version_num
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Runs catalog statement `name`, passing `target` for statements that take one.
    pub fn run(&mut self, name: &str, target: Option<&str>) -> Result<ResultSet, InspectError> {
        let spec = *self
            .catalog
            .get(name)
            .ok_or_else(|| InspectError::query(name, "no such query in the catalog"))?;
        let target = check_target(&spec, target)?;
        let sql = spec.sql.resolve(self.server_version_num);

        let statement = self
            .client
            .prepare(&sql)
            .map_err(|e| classify_error(spec.name, &e))?;
        let actual: Vec<&str> = statement.columns().iter().map(|c| c.name()).collect();
        check_columns(&spec, &actual)?;

        let rows = match target {
            Some(t) => self.client.query(&statement, &[&t]),
            None => self.client.query(&statement, &[]),
        }
        .map_err(|e| classify_error(spec.name, &e))?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(row.len());
            for idx in 0..row.len() {
                let cell = value::decode_cell(row, idx).map_err(|ty| {
                    InspectError::query(
                        spec.name,
                        format!("column {} has unsupported type {}", spec.columns[idx].name, ty),
                    )
                })?;
                cells.push(cell);
            }
            decoded.push(cells);
        }
        check_target_found(&spec, target, &decoded)?;

        debug!(query = spec.name, server = %self.label, rows = decoded.len(), "query finished");
        Ok(ResultSet::new(&spec, decoded))
    }

    /// Reads the current `pg_locks` snapshot.
    pub fn lock_snapshot(&mut self) -> Result<Vec<LockRow>, InspectError> {
        let result = self.run(LOCK_SNAPSHOT, None)?;
        Ok(lock_rows_from(&result)?)
    }
}

/// Decodes `lock_snapshot` rows.
pub fn lock_rows_from(result: &ResultSet) -> Result<Vec<LockRow>, GraphError> {
    result
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| -> Result<LockRow, GraphError> {
            let text = |i: usize| row.get(i).and_then(Value::as_str).unwrap_or_default();
            let pid = row
                .first()
                .and_then(Value::as_i64)
                .ok_or(GraphError::MalformedRow {
                    row: idx,
                    reason: "pid is missing",
                })?;
            let granted = row
                .get(5)
                .and_then(Value::as_bool)
                .ok_or(GraphError::MalformedRow {
                    row: idx,
                    reason: "granted is missing",
                })?;
            Ok(LockRow {
                pid: pid as i32,
                locktype: text(1).to_string(),
                object: text(2).to_string(),
                relation: Some(text(3).to_string()).filter(|r| !r.is_empty()),
                mode: text(4).to_string(),
                granted,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> QuerySpec {
        *QueryCatalog::builtin().get(name).unwrap()
    }

    #[test]
    fn missing_relation_is_a_query_error() {
        let class = classify_sqlstate(&SqlState::UNDEFINED_TABLE);
        assert_eq!(class, ErrorClass::Query);
        assert_eq!(classify_sqlstate(&SqlState::UNDEFINED_OBJECT), ErrorClass::Query);
        assert_eq!(classify_sqlstate(&SqlState::UNDEFINED_FUNCTION), ErrorClass::Query);
        assert_eq!(classify_sqlstate(&SqlState::QUERY_CANCELED), ErrorClass::Query);
    }

    #[test]
    fn insufficient_privilege_is_a_permission_error() {
        assert_eq!(
            classify_sqlstate(&SqlState::INSUFFICIENT_PRIVILEGE),
            ErrorClass::Permission
        );
    }

    #[test]
    fn auth_and_connection_states_are_connection_errors() {
        for code in [
            SqlState::INVALID_PASSWORD,
            SqlState::INVALID_AUTHORIZATION_SPECIFICATION,
            SqlState::INVALID_CATALOG_NAME,
            SqlState::CONNECTION_FAILURE,
            SqlState::CANNOT_CONNECT_NOW,
            SqlState::ADMIN_SHUTDOWN,
        ] {
            assert_eq!(classify_sqlstate(&code), ErrorClass::Connection, "{:?}", code);
        }
    }

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(InspectError::connection("refused").exit_code(), 1);
        assert_eq!(
            InspectError::Permission {
                query: "wal_segments".into(),
                message: "denied".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(InspectError::query("index_detail", "absent").exit_code(), 3);
        assert_eq!(
            InspectError::from(GraphError::SelfWait { pid: 7 }).exit_code(),
            3
        );
    }

    #[test]
    fn error_display_names_the_query() {
        let e = InspectError::query(
            "relation_buffers",
            "ERROR: relation \"nope\" does not exist",
        );
        assert_eq!(
            e.to_string(),
            "relation_buffers: ERROR: relation \"nope\" does not exist"
        );
    }

    #[test]
    fn target_is_required_for_targeted_queries() {
        let err = check_target(&spec("relation_buffers"), None).unwrap_err();
        assert!(matches!(err, InspectError::Query { .. }));
        assert!(err.to_string().contains("relation name is required"));

        let err = check_target(&spec("index_detail"), Some("  ")).unwrap_err();
        assert!(err.to_string().contains("index name is required"));

        assert_eq!(
            check_target(&spec("index_detail"), Some(" public.orders_pkey ")).unwrap(),
            Some("public.orders_pkey")
        );
    }

    #[test]
    fn target_is_rejected_for_untargeted_queries() {
        let err = check_target(&spec("locks"), Some("orders")).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(check_target(&spec("locks"), None).unwrap(), None);
    }

    #[test]
    fn column_mismatch_is_a_query_error() {
        let wal = spec("wal_segments");
        assert!(check_columns(&wal, &["name", "size_bytes", "modified"]).is_ok());
        let err = check_columns(&wal, &["name", "size"]).unwrap_err();
        assert!(err.to_string().contains("unexpected columns"));
    }

    #[test]
    fn lock_rows_decode_from_snapshot_result() {
        let spec = spec(LOCK_SNAPSHOT);
        let result = ResultSet::new(
            &spec,
            vec![
                vec![
                    Value::Int(101),
                    Value::Text("relation".into()),
                    Value::Text("relation:5:16384".into()),
                    Value::Text("public.orders".into()),
                    Value::Text("AccessExclusiveLock".into()),
                    Value::Bool(true),
                ],
                vec![
                    Value::Int(102),
                    Value::Text("transactionid".into()),
                    Value::Text("transactionid:742".into()),
                    Value::Text(String::new()),
                    Value::Text("ShareLock".into()),
                    Value::Bool(false),
                ],
            ],
        );
        let rows = lock_rows_from(&result).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pid, 101);
        assert_eq!(rows[0].relation.as_deref(), Some("public.orders"));
        assert!(rows[0].granted);
        assert_eq!(rows[1].relation, None);
        assert!(!rows[1].granted);
    }

    #[test]
    fn lock_rows_reject_null_pid() {
        let spec = spec(LOCK_SNAPSHOT);
        let result = ResultSet::new(
            &spec,
            vec![vec![
                Value::Null,
                Value::Text("relation".into()),
                Value::Text("relation:5:16384".into()),
                Value::Text(String::new()),
                Value::Text("ShareLock".into()),
                Value::Bool(false),
            ]],
        );
        assert!(matches!(
            lock_rows_from(&result),
            Err(GraphError::MalformedRow { row: 0, .. })
        ));
    }

    #[test]
    fn index_statement_without_rows_is_a_query_error() {
        let detail = spec("index_detail");
        let err = check_target_found(&detail, Some("public.orders"), &[]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "index_detail: \"public.orders\" is not an index"
        );

        let row = vec![Value::Text("public.orders_pkey".into())];
        assert!(check_target_found(&detail, Some("public.orders_pkey"), &[row]).is_ok());
    }

    #[test]
    fn empty_results_are_fine_for_other_statements() {
        assert!(check_target_found(&spec("relation_buffers"), Some("orders"), &[]).is_ok());
        assert!(check_target_found(&spec("locks"), None, &[]).is_ok());
    }

    #[test]
    fn server_version_parsing() {
        assert_eq!(parse_server_version("160002"), Some(160002));
        assert_eq!(parse_server_version(" 90624\n"), Some(90624));
        assert_eq!(parse_server_version(""), None);
        assert_eq!(parse_server_version("16.2"), None);
    }

    #[test]
    fn prefer_survives_tls_setup_failure() {
        assert!(tls_setup_failed(SslMode::Prefer, "no trust store".into()).is_ok());
        let err = tls_setup_failed(SslMode::Require, "no trust store".into()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "PostgreSQL: TLS setup: no trust store");
    }

    #[test]
    fn disable_never_builds_a_connector() {
        assert!(tls_connector(SslMode::Disable).unwrap().is_none());
    }

    /// Needs a live server: `PGINSPECT_TEST_DSN="host=... user=..." cargo test -- --ignored`
    #[test]
    #[ignore]
    fn live_missing_relation_yields_query_error() {
        let dsn = std::env::var("PGINSPECT_TEST_DSN").expect("PGINSPECT_TEST_DSN");
        let pg: postgres::Config = dsn.parse().expect("valid DSN");
        let mut config = ConnectionConfig::new(pg.get_user().unwrap_or("postgres"));
        if let Some(postgres::config::Host::Tcp(host)) = pg.get_hosts().first() {
            config.host = host.clone();
        }
        if let Some(port) = pg.get_ports().first() {
            config.port = *port;
        }
        if let Some(db) = pg.get_dbname() {
            config.dbname = db.to_string();
        }
        config.password = pg
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        config.ssl_mode = SslMode::Disable;

        let mut inspector =
            Inspector::connect(&config, Arc::new(QueryCatalog::builtin())).expect("connect");
        let err = inspector
            .run("index_detail", Some("no_such_index_for_pginspect"))
            .unwrap_err();
        assert!(matches!(err, InspectError::Query { .. }), "{}", err);
    }
}
