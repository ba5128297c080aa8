//! Durable store: a pooled `rusqlite` connection plus per-entity CRUD that
//! enforces the invariants named in §3 (§4.8/§6.3/§10.4). No other
//! component reaches around this module for its own entity.

mod migrations;

use crate::error::{GobbyError, Result};
use crate::ids::{AgentRunId, MessageId, PartyId, ProjectId, SessionId, TaskId, WorkflowInstanceId, WorktreeId};
use crate::model::{
    AgentRun, AgentRunStatus, InterSessionMessage, Party, PartyMember, Session, Task,
    TaskCategory, TaskStatus, Worktree, WorktreeStatus, WorkflowInstance,
};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

pub struct PersistenceManager {
    pool: Pool<SqliteConnectionManager>,
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn opt_rfc3339(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(to_rfc3339)
}

fn parse_opt_rfc3339(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| from_rfc3339(&s)).transpose()
}

impl PersistenceManager {
    pub fn open(db_path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder()
            .build(manager)
            .map_err(|e| GobbyError::internal(format!("building sqlite pool: {e}")))?;
        {
            let mut conn = pool
                .get()
                .map_err(|e| GobbyError::internal(format!("acquiring sqlite connection: {e}")))?;
            migrations::run(&mut conn)?;
        }
        Ok(Self { pool })
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| GobbyError::internal(format!("building sqlite pool: {e}")))?;
        {
            let mut conn = pool
                .get()
                .map_err(|e| GobbyError::internal(format!("acquiring sqlite connection: {e}")))?;
            migrations::run(&mut conn)?;
        }
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| GobbyError::BackendUnavailable(format!("sqlite pool exhausted: {e}")))
    }

    // ---- sessions ----

    pub fn insert_session(&self, s: &Session) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, source, project_id, status, parent_session_id,
                spawned_by_agent_id, agent_depth, transcript_path, machine_id,
                compact_markdown, terminal_context, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                s.id.to_string(),
                serde_json::to_string(&s.source)?,
                s.project_id.map(|p| p.to_string()),
                serde_json::to_string(&s.status)?,
                s.parent_session_id.map(|p| p.to_string()),
                s.spawned_by_agent_id.map(|p| p.to_string()),
                s.agent_depth,
                s.transcript_path,
                s.machine_id,
                s.compact_markdown,
                serde_json::to_string(&s.terminal_context)?,
                to_rfc3339(s.created_at),
                to_rfc3339(s.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: SessionId) -> Result<Session> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id.to_string()], row_to_session)
            .optional()?
            .ok_or_else(|| GobbyError::NotFound(format!("session {id}")))
    }

    pub fn list_sessions_by_project(&self, project_id: Option<ProjectId>) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE project_id IS ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![project_id.map(|p| p.to_string())], row_to_session)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn update_session(&self, s: &Session) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE sessions SET status=?2, transcript_path=?3, compact_markdown=?4,
                terminal_context=?5, updated_at=?6 WHERE id=?1",
            params![
                s.id.to_string(),
                serde_json::to_string(&s.status)?,
                s.transcript_path,
                s.compact_markdown,
                serde_json::to_string(&s.terminal_context)?,
                to_rfc3339(Utc::now()),
            ],
        )?;
        if n == 0 {
            return Err(GobbyError::NotFound(format!("session {}", s.id)));
        }
        Ok(())
    }

    // ---- session variables ----

    pub fn get_session_variables(&self, session_id: SessionId) -> Result<HashMap<String, serde_json::Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT variables FROM session_variables WHERE session_id = ?1",
                params![session_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(HashMap::new()),
        }
    }

    pub fn set_session_variables(&self, session_id: SessionId, vars: &HashMap<String, serde_json::Value>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO session_variables (session_id, variables) VALUES (?1, ?2)
             ON CONFLICT(session_id) DO UPDATE SET variables = excluded.variables",
            params![session_id.to_string(), serde_json::to_string(vars)?],
        )?;
        Ok(())
    }

    // ---- tasks ----

    pub fn next_seq_num(&self, project_id: Option<ProjectId>) -> Result<u64> {
        let conn = self.conn()?;
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(seq_num) FROM tasks WHERE project_id IS ?1",
                params![project_id.map(|p| p.to_string())],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0) as u64 + 1)
    }

    pub fn insert_task(&self, t: &Task) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (id, project_id, seq_num, title, description, status,
                parent_task_id, depends_on, category, priority, validation_criteria,
                validation_fail_count, reference_doc, expansion_context, is_enriched,
                is_expanded, is_tdd_applied, commit_sha, created_in_session_id,
                assigned_session_id, pending_review_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
            params![
                t.id.to_string(),
                t.project_id.map(|p| p.to_string()),
                t.seq_num as i64,
                t.title,
                t.description,
                serde_json::to_string(&t.status)?,
                t.parent_task_id.map(|p| p.to_string()),
                serde_json::to_string(&t.depends_on.iter().map(|d| d.to_string()).collect::<Vec<_>>())?,
                t.category.map(|c| serde_json::to_string(&c)).transpose()?,
                t.priority,
                t.validation_criteria,
                t.validation_fail_count,
                t.reference_doc,
                t.expansion_context,
                t.is_enriched,
                t.is_expanded,
                t.is_tdd_applied,
                t.commit_sha,
                t.created_in_session_id.to_string(),
                t.assigned_session_id.map(|p| p.to_string()),
                opt_rfc3339(t.pending_review_at),
                to_rfc3339(t.created_at),
                to_rfc3339(t.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id.to_string()], row_to_task)
            .optional()?
            .ok_or_else(|| GobbyError::NotFound(format!("task {id}")))
    }

    pub fn list_tasks_by_project(&self, project_id: Option<ProjectId>) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE project_id IS ?1")?;
        let rows = stmt.query_map(params![project_id.map(|p| p.to_string())], row_to_task)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Optimistic-concurrency update: fails with `Conflict` if `expected_status`
    /// no longer matches the stored row (§5 "task rows being closed").
    pub fn update_task(&self, t: &Task, expected_status: TaskStatus) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE tasks SET status=?2, validation_fail_count=?3, commit_sha=?4,
                assigned_session_id=?5, pending_review_at=?6, is_enriched=?7,
                is_expanded=?8, is_tdd_applied=?9, expansion_context=?10, updated_at=?11,
                depends_on=?13
             WHERE id=?1 AND status=?12",
            params![
                t.id.to_string(),
                serde_json::to_string(&t.status)?,
                t.validation_fail_count,
                t.commit_sha,
                t.assigned_session_id.map(|p| p.to_string()),
                opt_rfc3339(t.pending_review_at),
                t.is_enriched,
                t.is_expanded,
                t.is_tdd_applied,
                t.expansion_context,
                to_rfc3339(Utc::now()),
                serde_json::to_string(&expected_status)?,
                serde_json::to_string(&t.depends_on.iter().map(|d| d.to_string()).collect::<Vec<_>>())?,
            ],
        )?;
        if n == 0 {
            return Err(GobbyError::Conflict(format!("task {} changed concurrently", t.id)));
        }
        Ok(())
    }

    // ---- workflow instances ----

    pub fn upsert_workflow_instance(&self, wi: &WorkflowInstance) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO workflow_instances (id, session_id, workflow_name, enabled, priority,
                current_step, step_entered_at, step_action_count, total_action_count,
                variables, context_injected)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(session_id, workflow_name) DO UPDATE SET
                enabled=excluded.enabled, current_step=excluded.current_step,
                step_entered_at=excluded.step_entered_at,
                step_action_count=excluded.step_action_count,
                total_action_count=excluded.total_action_count,
                variables=excluded.variables, context_injected=excluded.context_injected",
            params![
                wi.id.to_string(),
                wi.session_id.to_string(),
                wi.workflow_name,
                wi.enabled,
                wi.priority,
                wi.current_step,
                opt_rfc3339(wi.step_entered_at),
                wi.step_action_count,
                wi.total_action_count,
                serde_json::to_string(&wi.variables)?,
                wi.context_injected,
            ],
        )?;
        Ok(())
    }

    pub fn get_workflow_instance(&self, session_id: SessionId, workflow_name: &str) -> Result<Option<WorkflowInstance>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM workflow_instances WHERE session_id = ?1 AND workflow_name = ?2",
            params![session_id.to_string(), workflow_name],
            row_to_workflow_instance,
        )
        .optional()
        .map_err(GobbyError::from)
    }

    pub fn list_workflow_instances_for_session(&self, session_id: SessionId) -> Result<Vec<WorkflowInstance>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM workflow_instances WHERE session_id = ?1")?;
        let rows = stmt.query_map(params![session_id.to_string()], row_to_workflow_instance)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---- agent runs ----

    pub fn insert_agent_run(&self, r: &AgentRun) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agent_runs (id, parent_session_id, child_session_id, workflow_name,
                provider, model, mode, prompt, status, worktree_id, result, party_id,
                started_at, completed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                r.id.to_string(),
                r.parent_session_id.to_string(),
                r.child_session_id.map(|p| p.to_string()),
                r.workflow_name,
                r.provider,
                r.model,
                serde_json::to_string(&r.mode)?,
                r.prompt,
                serde_json::to_string(&r.status)?,
                r.worktree_id.map(|p| p.to_string()),
                r.result.as_ref().map(serde_json::to_string).transpose()?,
                r.party_id.map(|p| p.to_string()),
                to_rfc3339(r.started_at),
                opt_rfc3339(r.completed_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_agent_run(&self, id: AgentRunId) -> Result<AgentRun> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM agent_runs WHERE id = ?1", params![id.to_string()], row_to_agent_run)
            .optional()?
            .ok_or_else(|| GobbyError::NotFound(format!("agent run {id}")))
    }

    pub fn list_agent_runs_for_parent(&self, parent_session_id: SessionId) -> Result<Vec<AgentRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM agent_runs WHERE parent_session_id = ?1 ORDER BY started_at")?;
        let rows = stmt.query_map(params![parent_session_id.to_string()], row_to_agent_run)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn update_agent_run_status(&self, id: AgentRunId, status: AgentRunStatus, completed_at: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE agent_runs SET status=?2, completed_at=?3 WHERE id=?1",
            params![id.to_string(), serde_json::to_string(&status)?, opt_rfc3339(completed_at)],
        )?;
        if n == 0 {
            return Err(GobbyError::NotFound(format!("agent run {id}")));
        }
        Ok(())
    }

    // ---- worktrees ----

    pub fn insert_worktree(&self, w: &Worktree) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO worktrees (id, project_id, owner_agent_run_id, isolation_mode, path,
                branch, base_commit, status, created_at, removed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                w.id.to_string(),
                w.project_id.to_string(),
                w.owner_agent_run_id.map(|p| p.to_string()),
                serde_json::to_string(&w.isolation_mode)?,
                w.path,
                w.branch,
                w.base_commit,
                serde_json::to_string(&w.status)?,
                to_rfc3339(w.created_at),
                opt_rfc3339(w.removed_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_worktree(&self, id: WorktreeId) -> Result<Worktree> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM worktrees WHERE id = ?1", params![id.to_string()], row_to_worktree)
            .optional()?
            .ok_or_else(|| GobbyError::NotFound(format!("worktree {id}")))
    }

    pub fn update_worktree_status(&self, id: WorktreeId, status: WorktreeStatus, removed_at: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE worktrees SET status=?2, removed_at=?3 WHERE id=?1",
            params![id.to_string(), serde_json::to_string(&status)?, opt_rfc3339(removed_at)],
        )?;
        if n == 0 {
            return Err(GobbyError::NotFound(format!("worktree {id}")));
        }
        Ok(())
    }

    pub fn update_worktree_owner(&self, id: WorktreeId, owner_agent_run_id: Option<AgentRunId>) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE worktrees SET owner_agent_run_id=?2 WHERE id=?1",
            params![id.to_string(), owner_agent_run_id.map(|p| p.to_string())],
        )?;
        if n == 0 {
            return Err(GobbyError::NotFound(format!("worktree {id}")));
        }
        Ok(())
    }

    pub fn list_worktrees_by_project(&self, project_id: ProjectId) -> Result<Vec<Worktree>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM worktrees WHERE project_id = ?1")?;
        let rows = stmt.query_map(params![project_id.to_string()], row_to_worktree)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ---- messages ----

    pub fn insert_message(&self, m: &InterSessionMessage) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, from_session_id, to_session_id, party_id, message_type,
                priority, body, read_at, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                m.id.to_string(),
                m.from_session_id.to_string(),
                m.to_session_id.map(|p| p.to_string()),
                m.party_id.map(|p| p.to_string()),
                serde_json::to_string(&m.message_type)?,
                serde_json::to_string(&m.priority)?,
                m.body,
                opt_rfc3339(m.read_at),
                to_rfc3339(m.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_messages_for_session(&self, session_id: SessionId, unread_only: bool) -> Result<Vec<InterSessionMessage>> {
        let conn = self.conn()?;
        let sql = if unread_only {
            "SELECT * FROM messages WHERE to_session_id = ?1 AND read_at IS NULL ORDER BY created_at"
        } else {
            "SELECT * FROM messages WHERE to_session_id = ?1 ORDER BY created_at"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![session_id.to_string()], row_to_message)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn mark_message_read(&self, id: MessageId) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE messages SET read_at=?2 WHERE id=?1",
            params![id.to_string(), to_rfc3339(Utc::now())],
        )?;
        if n == 0 {
            return Err(GobbyError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    // ---- parties ----

    pub fn insert_party(&self, p: &Party) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO parties (id, project_id, founder_session_id, name, status, members,
                created_at, completed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                p.id.to_string(),
                p.project_id.to_string(),
                p.founder_session_id.to_string(),
                p.name,
                serde_json::to_string(&p.status)?,
                serde_json::to_string(&p.members)?,
                to_rfc3339(p.created_at),
                opt_rfc3339(p.completed_at),
            ],
        )?;
        Ok(())
    }

    pub fn update_party(&self, p: &Party) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE parties SET status=?2, members=?3, completed_at=?4 WHERE id=?1",
            params![
                p.id.to_string(),
                serde_json::to_string(&p.status)?,
                serde_json::to_string(&p.members)?,
                opt_rfc3339(p.completed_at),
            ],
        )?;
        if n == 0 {
            return Err(GobbyError::NotFound(format!("party {}", p.id)));
        }
        Ok(())
    }

    pub fn get_party(&self, id: PartyId) -> Result<Party> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM parties WHERE id = ?1", params![id.to_string()], row_to_party)
            .optional()?
            .ok_or_else(|| GobbyError::NotFound(format!("party {id}")))
    }

    pub fn list_parties_by_project(&self, project_id: ProjectId) -> Result<Vec<Party>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM parties WHERE project_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![project_id.to_string()], row_to_party)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn parse_uuid(row: &Row, idx: usize) -> rusqlite::Result<uuid::Uuid> {
    let s: String = row.get(idx)?;
    let rest = s.splitn(2, '-').nth(1).unwrap_or(&s);
    // ids serialize as "<prefix>-<uuid>" via to_string of a raw uuid column;
    // columns store the full uuid (see insert_* calls), not the truncated
    // display form, so parse directly.
    uuid::Uuid::parse_str(&s)
        .or_else(|_| uuid::Uuid::parse_str(rest))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId::from_uuid(parse_uuid(row, 0)?),
        source: serde_json::from_str(&row.get::<_, String>(1)?).map_err(json_err(1))?,
        project_id: row.get::<_, Option<String>>(2)?.map(|s| ProjectId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        status: serde_json::from_str(&row.get::<_, String>(3)?).map_err(json_err(3))?,
        parent_session_id: row
            .get::<_, Option<String>>(4)?
            .map(|s| SessionId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        spawned_by_agent_id: row
            .get::<_, Option<String>>(5)?
            .map(|s| AgentRunId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        agent_depth: row.get(6)?,
        transcript_path: row.get(7)?,
        machine_id: row.get(8)?,
        compact_markdown: row.get(9)?,
        terminal_context: serde_json::from_str(&row.get::<_, String>(10)?).map_err(json_err(10))?,
        created_at: from_rfc3339(&row.get::<_, String>(11)?)?,
        updated_at: from_rfc3339(&row.get::<_, String>(12)?)?,
    })
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let depends_on: Vec<String> = serde_json::from_str(&row.get::<_, String>(7)?).map_err(json_err(7))?;
    Ok(Task {
        id: TaskId::from_uuid(parse_uuid(row, 0)?),
        project_id: row.get::<_, Option<String>>(1)?.map(|s| ProjectId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        seq_num: row.get::<_, i64>(2)? as u64,
        title: row.get(3)?,
        description: row.get(4)?,
        status: serde_json::from_str(&row.get::<_, String>(5)?).map_err(json_err(5))?,
        parent_task_id: row
            .get::<_, Option<String>>(6)?
            .map(|s| TaskId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        depends_on: depends_on
            .into_iter()
            .map(|s| TaskId::from_uuid(uuid::Uuid::parse_str(&s).unwrap()))
            .collect(),
        category: row
            .get::<_, Option<String>>(8)?
            .map(|s| serde_json::from_str::<TaskCategory>(&s))
            .transpose()
            .map_err(json_err(8))?,
        priority: row.get(9)?,
        validation_criteria: row.get(10)?,
        validation_fail_count: row.get(11)?,
        reference_doc: row.get(12)?,
        expansion_context: row.get(13)?,
        is_enriched: row.get(14)?,
        is_expanded: row.get(15)?,
        is_tdd_applied: row.get(16)?,
        commit_sha: row.get(17)?,
        created_in_session_id: SessionId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(18)?).unwrap()),
        assigned_session_id: row
            .get::<_, Option<String>>(19)?
            .map(|s| SessionId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        pending_review_at: parse_opt_rfc3339(row.get(20)?)?,
        created_at: from_rfc3339(&row.get::<_, String>(21)?)?,
        updated_at: from_rfc3339(&row.get::<_, String>(22)?)?,
    })
}

fn row_to_workflow_instance(row: &Row) -> rusqlite::Result<WorkflowInstance> {
    Ok(WorkflowInstance {
        id: WorkflowInstanceId::from_uuid(parse_uuid(row, 0)?),
        session_id: SessionId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(1)?).unwrap()),
        workflow_name: row.get(2)?,
        enabled: row.get(3)?,
        priority: row.get(4)?,
        current_step: row.get(5)?,
        step_entered_at: parse_opt_rfc3339(row.get(6)?)?,
        step_action_count: row.get(7)?,
        total_action_count: row.get(8)?,
        variables: serde_json::from_str(&row.get::<_, String>(9)?).map_err(json_err(9))?,
        context_injected: row.get(10)?,
    })
}

fn row_to_agent_run(row: &Row) -> rusqlite::Result<AgentRun> {
    Ok(AgentRun {
        id: AgentRunId::from_uuid(parse_uuid(row, 0)?),
        parent_session_id: SessionId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(1)?).unwrap()),
        child_session_id: row
            .get::<_, Option<String>>(2)?
            .map(|s| SessionId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        workflow_name: row.get(3)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        mode: serde_json::from_str(&row.get::<_, String>(6)?).map_err(json_err(6))?,
        prompt: row.get(7)?,
        status: serde_json::from_str(&row.get::<_, String>(8)?).map_err(json_err(8))?,
        worktree_id: row
            .get::<_, Option<String>>(9)?
            .map(|s| WorktreeId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        result: row
            .get::<_, Option<String>>(10)?
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(json_err(10))?,
        party_id: row
            .get::<_, Option<String>>(11)?
            .map(|s| PartyId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        started_at: from_rfc3339(&row.get::<_, String>(12)?)?,
        completed_at: parse_opt_rfc3339(row.get(13)?)?,
    })
}

fn row_to_worktree(row: &Row) -> rusqlite::Result<Worktree> {
    Ok(Worktree {
        id: WorktreeId::from_uuid(parse_uuid(row, 0)?),
        project_id: ProjectId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(1)?).unwrap()),
        owner_agent_run_id: row
            .get::<_, Option<String>>(2)?
            .map(|s| AgentRunId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        isolation_mode: serde_json::from_str(&row.get::<_, String>(3)?).map_err(json_err(3))?,
        path: row.get(4)?,
        branch: row.get(5)?,
        base_commit: row.get(6)?,
        status: serde_json::from_str(&row.get::<_, String>(7)?).map_err(json_err(7))?,
        created_at: from_rfc3339(&row.get::<_, String>(8)?)?,
        removed_at: parse_opt_rfc3339(row.get(9)?)?,
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<InterSessionMessage> {
    Ok(InterSessionMessage {
        id: MessageId::from_uuid(parse_uuid(row, 0)?),
        from_session_id: SessionId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(1)?).unwrap()),
        to_session_id: row
            .get::<_, Option<String>>(2)?
            .map(|s| SessionId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        party_id: row
            .get::<_, Option<String>>(3)?
            .map(|s| PartyId::from_uuid(uuid::Uuid::parse_str(&s).unwrap())),
        message_type: serde_json::from_str(&row.get::<_, String>(4)?).map_err(json_err(4))?,
        priority: serde_json::from_str(&row.get::<_, String>(5)?).map_err(json_err(5))?,
        body: row.get(6)?,
        read_at: parse_opt_rfc3339(row.get(7)?)?,
        created_at: from_rfc3339(&row.get::<_, String>(8)?)?,
    })
}

fn row_to_party(row: &Row) -> rusqlite::Result<Party> {
    let members: Vec<PartyMember> = serde_json::from_str(&row.get::<_, String>(5)?).map_err(json_err(5))?;
    Ok(Party {
        id: PartyId::from_uuid(parse_uuid(row, 0)?),
        project_id: ProjectId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(1)?).unwrap()),
        founder_session_id: SessionId::from_uuid(uuid::Uuid::parse_str(&row.get::<_, String>(2)?).unwrap()),
        name: row.get(3)?,
        status: serde_json::from_str(&row.get::<_, String>(4)?).map_err(json_err(4))?,
        members,
        created_at: from_rfc3339(&row.get::<_, String>(6)?)?,
        completed_at: parse_opt_rfc3339(row.get(7)?)?,
    })
}

fn json_err(idx: usize) -> impl FnOnce(serde_json::Error) -> rusqlite::Error {
    move |e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Session, SessionSource, Task, TaskStatus};

    fn pm() -> PersistenceManager {
        PersistenceManager::open_in_memory().unwrap()
    }

    #[test]
    fn session_round_trips() {
        let pm = pm();
        let s = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&s).unwrap();
        let back = pm.get_session(s.id).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.machine_id, "m1");
    }

    #[test]
    fn task_optimistic_concurrency_rejects_stale_update() {
        let pm = pm();
        let s = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&s).unwrap();
        let seq = pm.next_seq_num(None).unwrap();
        let mut t = Task {
            id: TaskId::new(),
            project_id: None,
            seq_num: seq,
            title: "t".into(),
            description: "d".into(),
            status: TaskStatus::Pending,
            parent_task_id: None,
            depends_on: vec![],
            category: None,
            priority: 0,
            validation_criteria: None,
            validation_fail_count: 0,
            reference_doc: None,
            expansion_context: None,
            is_enriched: false,
            is_expanded: false,
            is_tdd_applied: false,
            commit_sha: None,
            created_in_session_id: s.id,
            assigned_session_id: None,
            pending_review_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        pm.insert_task(&t).unwrap();
        t.status = TaskStatus::InProgress;
        pm.update_task(&t, TaskStatus::Pending).unwrap();
        // Stale expectation now fails.
        t.status = TaskStatus::Completed;
        let err = pm.update_task(&t, TaskStatus::Pending).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn session_variables_shared_map_round_trips() {
        let pm = pm();
        let s = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&s).unwrap();
        let mut vars = HashMap::new();
        vars.insert("flag".to_string(), serde_json::json!(true));
        pm.set_session_variables(s.id, &vars).unwrap();
        let back = pm.get_session_variables(s.id).unwrap();
        assert_eq!(back.get("flag"), Some(&serde_json::json!(true)));
    }
}
