//! SQL builders for PostgreSQL administrative views.
//!
//! Every statement is read-only. Statements that take a target resolve it
//! through `$1::text::regclass`, so an unknown name fails on the server with
//! `42P01 undefined_table` instead of returning an empty result.

/// Top relations by shared buffers held (requires `pg_buffercache`).
pub(super) fn build_buffer_cache_query() -> &'static str {
    r#"
        SELECT
            COALESCE(n.nspname || '.' || c.relname, b.relfilenode::text) AS relation,
            count(*)::bigint AS buffers,
            (count(*) * current_setting('block_size')::bigint) AS buffered_bytes,
            round(100.0 * count(*) / NULLIF((SELECT count(*) FROM pg_buffercache), 0), 1)::double precision AS pct_of_cache,
            count(*) FILTER (WHERE b.isdirty)::bigint AS dirty
        FROM pg_buffercache b
        JOIN pg_database d ON d.oid = b.reldatabase AND d.datname = current_database()
        LEFT JOIN pg_class c ON pg_relation_filenode(c.oid) = b.relfilenode
        LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
        GROUP BY 1
        ORDER BY buffers DESC
        LIMIT 50
    "#
}

/// Usage-count histogram of the whole buffer pool (requires `pg_buffercache`).
pub(super) fn build_buffer_usage_query() -> &'static str {
    r#"
        SELECT
            COALESCE(usagecount::text, 'unused') AS usage_count,
            count(*)::bigint AS buffers,
            count(*) FILTER (WHERE isdirty)::bigint AS dirty,
            count(*) FILTER (WHERE pinning_backends > 0)::bigint AS pinned
        FROM pg_buffercache
        GROUP BY usagecount
        ORDER BY usagecount NULLS FIRST
    "#
}

/// Shared buffers held by a single relation (requires `pg_buffercache`).
pub(super) fn build_relation_buffers_query() -> &'static str {
    r#"
        WITH target AS (
            SELECT $1::text::regclass::oid AS oid
        )
        SELECT
            c.oid::regclass::text AS relation,
            count(b.bufferid)::bigint AS buffers,
            (count(b.bufferid) * current_setting('block_size')::bigint) AS buffered_bytes,
            count(b.bufferid) FILTER (WHERE b.isdirty)::bigint AS dirty,
            round(100.0 * count(b.bufferid) / NULLIF(pg_relation_size(c.oid) / current_setting('block_size')::bigint, 0), 1)::double precision AS pct_of_relation
        FROM target t
        JOIN pg_class c ON c.oid = t.oid
        LEFT JOIN pg_buffercache b
            ON b.relfilenode = pg_relation_filenode(c.oid)
           AND b.reldatabase = (SELECT oid FROM pg_database WHERE datname = current_database())
        GROUP BY c.oid
    "#
}

/// Builds version-aware query for pg_stat_bgwriter (+ pg_stat_checkpointer on PG 17+).
///
/// PG < 17: all fields in pg_stat_bgwriter.
/// PG 17+:  checkpoint fields moved to pg_stat_checkpointer,
///          buffers_backend moved to pg_stat_io and reads as 0.
pub(super) fn build_bgwriter_query(server_version_num: Option<i32>) -> String {
    let v = server_version_num.unwrap_or(0);

    if v >= 170000 {
        r#"
            SELECT
                COALESCE(c.num_timed, 0)::bigint AS checkpoints_timed,
                COALESCE(c.num_requested, 0)::bigint AS checkpoints_req,
                COALESCE(c.buffers_written, 0)::bigint AS buffers_checkpoint,
                COALESCE(b.buffers_clean, 0)::bigint AS buffers_clean,
                COALESCE(b.maxwritten_clean, 0)::bigint AS maxwritten_clean,
                0::bigint AS buffers_backend,
                COALESCE(b.buffers_alloc, 0)::bigint AS buffers_alloc
            FROM pg_stat_bgwriter b
            CROSS JOIN pg_stat_checkpointer c
        "#
        .to_string()
    } else {
        r#"
            SELECT
                COALESCE(checkpoints_timed, 0)::bigint AS checkpoints_timed,
                COALESCE(checkpoints_req, 0)::bigint AS checkpoints_req,
                COALESCE(buffers_checkpoint, 0)::bigint AS buffers_checkpoint,
                COALESCE(buffers_clean, 0)::bigint AS buffers_clean,
                COALESCE(maxwritten_clean, 0)::bigint AS maxwritten_clean,
                COALESCE(buffers_backend, 0)::bigint AS buffers_backend,
                COALESCE(buffers_alloc, 0)::bigint AS buffers_alloc
            FROM pg_stat_bgwriter
        "#
        .to_string()
    }
}

/// Builds version-aware query for the current WAL position.
///
/// PG 10 renamed the `xlog` functions to `wal`. On a standby the insert
/// position is unavailable, so the last replayed LSN is reported instead.
pub(super) fn build_wal_position_query(server_version_num: Option<i32>) -> String {
    let (current_lsn, insert_lsn, replay_lsn, file_name) =
        if server_version_num.unwrap_or(0) >= 100000 {
            (
                "pg_current_wal_lsn()",
                "pg_current_wal_insert_lsn()",
                "pg_last_wal_replay_lsn()",
                "pg_walfile_name",
            )
        } else {
            (
                "pg_current_xlog_location()",
                "pg_current_xlog_insert_location()",
                "pg_last_xlog_replay_location()",
                "pg_xlogfile_name",
            )
        };

    format!(
        r#"
            SELECT
                pg_is_in_recovery() AS in_recovery,
                CASE WHEN pg_is_in_recovery() THEN NULL
                     ELSE {current_lsn}::text END AS current_lsn,
                CASE WHEN pg_is_in_recovery() THEN NULL
                     ELSE {insert_lsn}::text END AS insert_lsn,
                CASE WHEN pg_is_in_recovery() THEN {replay_lsn}::text
                     ELSE NULL END AS replay_lsn,
                CASE WHEN pg_is_in_recovery() THEN NULL
                     ELSE {file_name}({current_lsn}) END AS wal_file,
                current_setting('wal_segment_size') AS wal_segment_size
        "#
    )
}

/// Newest WAL segments in `pg_wal` (PG 10+, needs `pg_monitor` or superuser).
pub(super) fn build_wal_segments_query() -> &'static str {
    r#"
        SELECT
            name,
            size::bigint AS size_bytes,
            to_char(modification, 'YYYY-MM-DD HH24:MI:SS') AS modified
        FROM pg_ls_waldir()
        WHERE name ~ '^[0-9A-F]{24}$'
        ORDER BY name DESC
        LIMIT 50
    "#
}

/// Heavyweight locks with the owning session.
pub(super) fn build_locks_query() -> &'static str {
    r#"
        SELECT
            l.pid,
            l.locktype,
            COALESCE(l.relation::regclass::text, '') AS relation,
            l.mode,
            l.granted,
            COALESCE(a.usename::text, '') AS usename,
            COALESCE(a.state, '') AS state,
            COALESCE(EXTRACT(EPOCH FROM now() - a.xact_start)::bigint, 0) AS xact_age_s,
            COALESCE(left(a.query, 120), '') AS query
        FROM pg_locks l
        LEFT JOIN pg_stat_activity a ON a.pid = l.pid
        WHERE l.pid IS NOT NULL
          AND l.locktype NOT IN ('advisory')
          AND l.mode <> 'SIReadLock'
        ORDER BY l.granted, l.pid, l.locktype
    "#
}

/// Advisory locks only (`pg_advisory_lock` family).
pub(super) fn build_advisory_locks_query() -> &'static str {
    r#"
        SELECT
            l.pid,
            COALESCE(d.datname::text, '') AS datname,
            l.classid::bigint AS key_high,
            l.objid::bigint AS key_low,
            l.objsubid::int AS key_kind,
            l.mode,
            l.granted
        FROM pg_locks l
        LEFT JOIN pg_database d ON d.oid = l.database
        WHERE l.locktype = 'advisory'
        ORDER BY l.granted, l.pid
    "#
}

/// Predicate (SSI) locks held by serializable transactions.
pub(super) fn build_predicate_locks_query() -> &'static str {
    r#"
        SELECT
            l.pid,
            l.locktype,
            COALESCE(l.relation::regclass::text, '') AS relation,
            l.page::bigint AS page,
            l.tuple::int AS tuple
        FROM pg_locks l
        WHERE l.mode = 'SIReadLock'
        ORDER BY l.pid, relation, page NULLS FIRST, tuple NULLS FIRST
    "#
}

/// Raw lock snapshot feeding the wait graph.
///
/// `object` concatenates every column that identifies the lockable object, so
/// two rows contend for the same object exactly when their `object` values match.
/// Predicate locks never block and are left out.
pub(super) fn build_lock_snapshot_query() -> &'static str {
    r#"
        SELECT
            l.pid,
            l.locktype,
            concat_ws(':', l.locktype, l.database, l.relation, l.page, l.tuple,
                      l.virtualxid, l.transactionid, l.classid, l.objid, l.objsubid) AS object,
            COALESCE(l.relation::regclass::text, '') AS relation,
            l.mode,
            l.granted
        FROM pg_locks l
        WHERE l.pid IS NOT NULL
          AND l.mode <> 'SIReadLock'
        ORDER BY l.pid
    "#
}

/// Builds version-aware query for pg_stat_progress_vacuum (PG 9.6+).
///
/// PG < 17: uses original column names (max_dead_tuples, num_dead_tuples).
/// PG 17+:  renamed columns (max_dead_tuple_bytes, num_dead_item_ids).
pub(super) fn build_vacuum_progress_query(server_version_num: Option<i32>) -> String {
    let (max_dead_expr, num_dead_expr) = if server_version_num.unwrap_or(0) >= 170000 {
        ("p.max_dead_tuple_bytes", "p.num_dead_item_ids")
    } else {
        ("p.max_dead_tuples", "p.num_dead_tuples")
    };

    format!(
        r#"
            SELECT
                p.pid,
                COALESCE(p.datname::text, '') AS datname,
                COALESCE(p.relid::regclass::text, '') AS relation,
                COALESCE(p.phase, '') AS phase,
                p.heap_blks_total::bigint AS heap_blks_total,
                p.heap_blks_scanned::bigint AS heap_blks_scanned,
                p.heap_blks_vacuumed::bigint AS heap_blks_vacuumed,
                round(100.0 * p.heap_blks_scanned / NULLIF(p.heap_blks_total, 0), 1)::double precision AS pct_scanned,
                p.index_vacuum_count::bigint AS index_vacuum_count,
                {max_dead_expr}::bigint AS max_dead_tuples,
                {num_dead_expr}::bigint AS num_dead_tuples
            FROM pg_stat_progress_vacuum p
            ORDER BY p.pid
        "#
    )
}

/// Dead tuples per table against the autovacuum trigger threshold.
///
/// Threshold uses the global settings; per-table reloptions are not consulted.
pub(super) fn build_autovacuum_stats_query() -> &'static str {
    r#"
        SELECT
            s.schemaname::text || '.' || s.relname::text AS relation,
            COALESCE(s.n_live_tup, 0)::bigint AS n_live_tup,
            COALESCE(s.n_dead_tup, 0)::bigint AS n_dead_tup,
            (current_setting('autovacuum_vacuum_threshold')::bigint
             + current_setting('autovacuum_vacuum_scale_factor')::double precision
               * COALESCE(s.n_live_tup, 0))::bigint AS vacuum_threshold,
            COALESCE(to_char(s.last_autovacuum, 'YYYY-MM-DD HH24:MI:SS'), '') AS last_autovacuum,
            COALESCE(to_char(s.last_vacuum, 'YYYY-MM-DD HH24:MI:SS'), '') AS last_vacuum,
            COALESCE(s.autovacuum_count, 0)::bigint AS autovacuum_count,
            COALESCE(s.autoanalyze_count, 0)::bigint AS autoanalyze_count
        FROM pg_stat_user_tables s
        ORDER BY COALESCE(s.n_dead_tup, 0) DESC
        LIMIT 50
    "#
}

/// Builds query for pg_stat_user_indexes.
///
/// All columns exist since PG 9.1+, no version check needed.
/// Includes pg_relation_size() for index size.
pub(super) fn build_index_usage_query() -> &'static str {
    r#"
        SELECT
            i.schemaname::text || '.' || i.indexrelname::text AS index_name,
            i.relname::text AS relation,
            COALESCE(i.idx_scan, 0)::bigint AS idx_scan,
            COALESCE(i.idx_tup_read, 0)::bigint AS idx_tup_read,
            COALESCE(i.idx_tup_fetch, 0)::bigint AS idx_tup_fetch,
            COALESCE(pg_relation_size(i.indexrelid), 0)::bigint AS size_bytes
        FROM pg_stat_user_indexes i
        ORDER BY COALESCE(i.idx_scan, 0) DESC
        LIMIT 50
    "#
}

/// Usage and definition of a single index.
///
/// A name that resolves to something other than an index yields no rows;
/// the inspector reports that as a failed lookup.
pub(super) fn build_index_detail_query() -> &'static str {
    r#"
        SELECT
            s.schemaname::text || '.' || s.indexrelname::text AS index_name,
            s.relname::text AS relation,
            COALESCE(s.idx_scan, 0)::bigint AS idx_scan,
            COALESCE(s.idx_tup_read, 0)::bigint AS idx_tup_read,
            COALESCE(s.idx_tup_fetch, 0)::bigint AS idx_tup_fetch,
            COALESCE(pg_relation_size(s.indexrelid), 0)::bigint AS size_bytes,
            x.indisunique AS is_unique,
            x.indisvalid AS is_valid,
            pg_get_indexdef(s.indexrelid) AS definition
        FROM pg_stat_all_indexes s
        JOIN pg_index x ON x.indexrelid = s.indexrelid
        WHERE s.indexrelid = $1::text::regclass::oid
    "#
}
