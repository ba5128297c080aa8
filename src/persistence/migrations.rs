//! Linear schema migrations, applied transactionally against a
//! `schema_version` row (§4.8/§6.3/§10.4).

use rusqlite::{Connection, Transaction};

type MigrationFn = fn(&Transaction) -> rusqlite::Result<()>;

const MIGRATIONS: &[(i64, MigrationFn)] = &[
    (1, migration_0001_initial),
    (2, migration_0002_parties),
    (3, migration_0003_drop_stop_signals),
];

pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or_else(|_| Ok(0))
}

/// Applies every migration newer than the current `schema_version`, each in
/// its own transaction. Idempotent: re-running against an up-to-date
/// database is a no-op.
pub fn run(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    )?;
    let current = current_version(conn)?;
    for (version, migration) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        migration(&tx)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
    }
    Ok(())
}

fn migration_0001_initial(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE sessions (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            project_id TEXT,
            status TEXT NOT NULL,
            parent_session_id TEXT,
            spawned_by_agent_id TEXT,
            agent_depth INTEGER NOT NULL,
            transcript_path TEXT,
            machine_id TEXT NOT NULL,
            compact_markdown TEXT,
            terminal_context TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE tasks (
            id TEXT PRIMARY KEY,
            project_id TEXT,
            seq_num INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            parent_task_id TEXT,
            depends_on TEXT NOT NULL,
            category TEXT,
            priority INTEGER NOT NULL,
            validation_criteria TEXT,
            validation_fail_count INTEGER NOT NULL,
            reference_doc TEXT,
            expansion_context TEXT,
            is_enriched INTEGER NOT NULL,
            is_expanded INTEGER NOT NULL,
            is_tdd_applied INTEGER NOT NULL,
            commit_sha TEXT,
            created_in_session_id TEXT NOT NULL,
            assigned_session_id TEXT,
            pending_review_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX idx_tasks_project_seq ON tasks(project_id, seq_num);

        CREATE TABLE workflow_instances (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            workflow_name TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            current_step TEXT,
            step_entered_at TEXT,
            step_action_count INTEGER NOT NULL,
            total_action_count INTEGER NOT NULL,
            variables TEXT NOT NULL,
            context_injected INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX idx_wfi_session_name ON workflow_instances(session_id, workflow_name);

        CREATE TABLE session_variables (
            session_id TEXT PRIMARY KEY,
            variables TEXT NOT NULL
        );

        CREATE TABLE agent_runs (
            id TEXT PRIMARY KEY,
            parent_session_id TEXT NOT NULL,
            child_session_id TEXT,
            workflow_name TEXT,
            provider TEXT NOT NULL,
            model TEXT,
            mode TEXT NOT NULL,
            prompt TEXT NOT NULL,
            status TEXT NOT NULL,
            worktree_id TEXT,
            result TEXT,
            party_id TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE worktrees (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            owner_agent_run_id TEXT,
            isolation_mode TEXT NOT NULL,
            path TEXT NOT NULL,
            branch TEXT,
            base_commit TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            removed_at TEXT
        );

        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            from_session_id TEXT NOT NULL,
            to_session_id TEXT,
            party_id TEXT,
            message_type TEXT NOT NULL,
            priority TEXT NOT NULL,
            body TEXT NOT NULL,
            read_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE stop_signals (
            session_id TEXT PRIMARY KEY,
            reason TEXT,
            requested_at TEXT NOT NULL,
            acknowledged_at TEXT
        );
        ",
    )
}

fn migration_0002_parties(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE parties (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            founder_session_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            members TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT
        );
        ",
    )
}

/// The stop signal registry moved in-memory (§9): it is the one piece of
/// global mutable state the spec exempts from persistence, and a signal that
/// outlives the process it was meant to stop is never useful. Dropped rather
/// than edited into `migration_0001_initial`, per the linear-migration rule.
fn migration_0003_drop_stop_signals(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch("DROP TABLE IF EXISTS stop_signals;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_to_latest_and_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        let v1 = current_version(&conn).unwrap();
        assert_eq!(v1, MIGRATIONS.last().unwrap().0);
        run(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), v1);
    }
}
