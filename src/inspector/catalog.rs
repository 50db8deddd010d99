//! The fixed catalog of introspection statements.
//!
//! The catalog is built once at startup and shared read-only between
//! inspectors. Statements whose text depends on the server version carry a
//! builder instead of a literal; the builder is resolved against the
//! connection's `server_version_num` at execution time.

use serde::Serialize;

use super::queries::*;

/// How a column is rendered in text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Plain,
    /// Byte count, shown as `1.5G`.
    Bytes,
    /// Seconds, shown as `3m5s`.
    Seconds,
    /// Percentage with one decimal.
    Percent,
}

/// An expected output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Plain,
    }
}

const fn bytes(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Bytes,
    }
}

const fn secs(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Seconds,
    }
}

const fn pct(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Percent,
    }
}

/// What kind of object a statement's `$1` parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    None,
    Relation,
    Index,
}

/// Statement text, fixed or derived from the server version.
#[derive(Clone, Copy)]
pub enum SqlText {
    Static(&'static str),
    Versioned(fn(Option<i32>) -> String),
}

impl SqlText {
    pub fn resolve(&self, server_version_num: Option<i32>) -> String {
        match self {
            SqlText::Static(sql) => (*sql).to_string(),
            SqlText::Versioned(build) => build(server_version_num),
        }
    }
}

impl std::fmt::Debug for SqlText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlText::Static(_) => f.write_str("SqlText::Static"),
            SqlText::Versioned(_) => f.write_str("SqlText::Versioned"),
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct QuerySpec {
    pub name: &'static str,
    pub description: &'static str,
    pub sql: SqlText,
    pub columns: &'static [Column],
    pub target: TargetKind,
}

impl QuerySpec {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn takes_target(&self) -> bool {
        self.target != TargetKind::None
    }
}

const BUFFER_CACHE_COLUMNS: &[Column] = &[
    col("relation"),
    col("buffers"),
    bytes("buffered_bytes"),
    pct("pct_of_cache"),
    col("dirty"),
];

const BUFFER_USAGE_COLUMNS: &[Column] = &[
    col("usage_count"),
    col("buffers"),
    col("dirty"),
    col("pinned"),
];

const RELATION_BUFFERS_COLUMNS: &[Column] = &[
    col("relation"),
    col("buffers"),
    bytes("buffered_bytes"),
    col("dirty"),
    pct("pct_of_relation"),
];

const BGWRITER_COLUMNS: &[Column] = &[
    col("checkpoints_timed"),
    col("checkpoints_req"),
    col("buffers_checkpoint"),
    col("buffers_clean"),
    col("maxwritten_clean"),
    col("buffers_backend"),
    col("buffers_alloc"),
];

const WAL_POSITION_COLUMNS: &[Column] = &[
    col("in_recovery"),
    col("current_lsn"),
    col("insert_lsn"),
    col("replay_lsn"),
    col("wal_file"),
    col("wal_segment_size"),
];

const WAL_SEGMENTS_COLUMNS: &[Column] = &[
    col("name"),
    bytes("size_bytes"),
    col("modified"),
];

const LOCKS_COLUMNS: &[Column] = &[
    col("pid"),
    col("locktype"),
    col("relation"),
    col("mode"),
    col("granted"),
    col("usename"),
    col("state"),
    secs("xact_age_s"),
    col("query"),
];

const ADVISORY_LOCKS_COLUMNS: &[Column] = &[
    col("pid"),
    col("datname"),
    col("key_high"),
    col("key_low"),
    col("key_kind"),
    col("mode"),
    col("granted"),
];

const PREDICATE_LOCKS_COLUMNS: &[Column] = &[
    col("pid"),
    col("locktype"),
    col("relation"),
    col("page"),
    col("tuple"),
];

const LOCK_SNAPSHOT_COLUMNS: &[Column] = &[
    col("pid"),
    col("locktype"),
    col("object"),
    col("relation"),
    col("mode"),
    col("granted"),
];

const VACUUM_PROGRESS_COLUMNS: &[Column] = &[
    col("pid"),
    col("datname"),
    col("relation"),
    col("phase"),
    col("heap_blks_total"),
    col("heap_blks_scanned"),
    col("heap_blks_vacuumed"),
    pct("pct_scanned"),
    col("index_vacuum_count"),
    col("max_dead_tuples"),
    col("num_dead_tuples"),
];

const AUTOVACUUM_STATS_COLUMNS: &[Column] = &[
    col("relation"),
    col("n_live_tup"),
    col("n_dead_tup"),
    col("vacuum_threshold"),
    col("last_autovacuum"),
    col("last_vacuum"),
    col("autovacuum_count"),
    col("autoanalyze_count"),
];

const INDEX_USAGE_COLUMNS: &[Column] = &[
    col("index_name"),
    col("relation"),
    col("idx_scan"),
    col("idx_tup_read"),
    col("idx_tup_fetch"),
    bytes("size_bytes"),
];

const INDEX_DETAIL_COLUMNS: &[Column] = &[
    col("index_name"),
    col("relation"),
    col("idx_scan"),
    col("idx_tup_read"),
    col("idx_tup_fetch"),
    bytes("size_bytes"),
    col("is_unique"),
    col("is_valid"),
    col("definition"),
];

/// Name of the statement feeding the wait graph.
pub const LOCK_SNAPSHOT: &str = "lock_snapshot";

/// Immutable, ordered set of query specs.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    specs: Vec<QuerySpec>,
}

impl QueryCatalog {
    /// Creates a catalog from explicit specs. Later duplicates of a name are dropped.
    pub fn new(specs: Vec<QuerySpec>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let specs = specs.into_iter().filter(|s| seen.insert(s.name)).collect();
        Self { specs }
    }

    /// The built-in statements.
    pub fn builtin() -> Self {
        Self::new(vec![
            QuerySpec {
                name: "buffer_cache",
                description: "Relations holding the most shared buffers (pg_buffercache)",
                sql: SqlText::Static(build_buffer_cache_query()),
                columns: BUFFER_CACHE_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "buffer_usage",
                description: "Buffer pool usage-count histogram (pg_buffercache)",
                sql: SqlText::Static(build_buffer_usage_query()),
                columns: BUFFER_USAGE_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "relation_buffers",
                description: "Shared buffers held by one relation (pg_buffercache)",
                sql: SqlText::Static(build_relation_buffers_query()),
                columns: RELATION_BUFFERS_COLUMNS,
                target: TargetKind::Relation,
            },
            QuerySpec {
                name: "bgwriter",
                description: "Checkpoint and background writer buffer counters",
                sql: SqlText::Versioned(build_bgwriter_query),
                columns: BGWRITER_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "wal_position",
                description: "Current WAL LSN and segment file",
                sql: SqlText::Versioned(build_wal_position_query),
                columns: WAL_POSITION_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "wal_segments",
                description: "Newest WAL segment files (pg_ls_waldir)",
                sql: SqlText::Static(build_wal_segments_query()),
                columns: WAL_SEGMENTS_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "locks",
                description: "Heavyweight locks with owning sessions",
                sql: SqlText::Static(build_locks_query()),
                columns: LOCKS_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "advisory_locks",
                description: "Advisory locks",
                sql: SqlText::Static(build_advisory_locks_query()),
                columns: ADVISORY_LOCKS_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "predicate_locks",
                description: "Serializable (SIRead) predicate locks",
                sql: SqlText::Static(build_predicate_locks_query()),
                columns: PREDICATE_LOCKS_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: LOCK_SNAPSHOT,
                description: "Raw pg_locks snapshot used for the wait graph",
                sql: SqlText::Static(build_lock_snapshot_query()),
                columns: LOCK_SNAPSHOT_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "vacuum_progress",
                description: "Running VACUUM operations",
                sql: SqlText::Versioned(build_vacuum_progress_query),
                columns: VACUUM_PROGRESS_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "autovacuum_stats",
                description: "Dead tuples against the autovacuum threshold",
                sql: SqlText::Static(build_autovacuum_stats_query()),
                columns: AUTOVACUUM_STATS_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "index_usage",
                description: "Index scans and sizes (pg_stat_user_indexes)",
                sql: SqlText::Static(build_index_usage_query()),
                columns: INDEX_USAGE_COLUMNS,
                target: TargetKind::None,
            },
            QuerySpec {
                name: "index_detail",
                description: "Usage and definition of one index",
                sql: SqlText::Static(build_index_detail_query()),
                columns: INDEX_DETAIL_COLUMNS,
                target: TargetKind::Index,
            },
        ])
    }

    pub fn get(&self, name: &str) -> Option<&QuerySpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuerySpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
