//! Persistent DAG of work items with dependency-aware retrieval and a
//! status state machine (§4.2).

mod status;

pub use status::transition_allowed;

use crate::error::{GobbyError, Result};
use crate::ids::{ProjectId, SessionId, TaskId};
use crate::model::{Session, Task, TaskCategory, TaskStatus};
use crate::persistence::PersistenceManager;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default escalation threshold (§4.2 `validate_task`).
pub const DEFAULT_VALIDATION_FAIL_LIMIT: u32 = 3;

pub struct TaskGraph {
    persistence: Arc<PersistenceManager>,
    validation_fail_limit: u32,
    /// Notified whenever any task leaves `in_progress`; `wait_for_task*`
    /// wakes on this rather than polling tightly (§9 "coroutine/async
    /// control flow for waits").
    changed: Arc<Notify>,
}

impl TaskGraph {
    pub fn new(persistence: Arc<PersistenceManager>, validation_fail_limit: u32) -> Self {
        Self {
            persistence,
            validation_fail_limit,
            changed: Arc::new(Notify::new()),
        }
    }

    pub fn create_task(
        &self,
        project_id: Option<ProjectId>,
        title: String,
        description: String,
        depends_on: Vec<TaskId>,
        category: Option<TaskCategory>,
        priority: i32,
        created_in_session_id: SessionId,
    ) -> Result<Task> {
        self.reject_if_cycle(project_id, None, &depends_on)?;
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            project_id,
            seq_num: self.persistence.next_seq_num(project_id)?,
            title,
            description,
            status: TaskStatus::Pending,
            parent_task_id: None,
            depends_on,
            category,
            priority,
            validation_criteria: None,
            validation_fail_count: 0,
            reference_doc: None,
            expansion_context: None,
            is_enriched: false,
            is_expanded: false,
            is_tdd_applied: false,
            commit_sha: None,
            created_in_session_id,
            assigned_session_id: None,
            pending_review_at: None,
            created_at: now,
            updated_at: now,
        };
        self.persistence.insert_task(&task)?;
        debug!(task_id = %task.id, seq = task.seq_num, "task created");
        Ok(task)
    }

    /// Rejects a write that would introduce a dependency cycle, via DFS
    /// reachability from each proposed dependency back to `task_id` (or, for
    /// a not-yet-created task, to any of its own proposed `depends_on`).
    fn reject_if_cycle(&self, project_id: Option<ProjectId>, task_id: Option<TaskId>, depends_on: &[TaskId]) -> Result<()> {
        let all = self.persistence.list_tasks_by_project(project_id)?;
        let by_id: HashMap<TaskId, &Task> = all.iter().map(|t| (t.id, t)).collect();
        for &dep in depends_on {
            let mut visited = HashSet::new();
            let mut stack = vec![dep];
            while let Some(current) = stack.pop() {
                if Some(current) == task_id {
                    return Err(GobbyError::CycleDetected(format!(
                        "dependency {dep} would create a cycle back to the task being written"
                    )));
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(t) = by_id.get(&current) {
                    stack.extend(t.depends_on.iter().copied());
                }
            }
        }
        Ok(())
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.persistence.get_task(task_id)
    }

    /// Read-only snapshot of every task in a project, for callers (e.g. the
    /// workflow engine's condition functions) that need to reason about the
    /// whole tree rather than a single row.
    pub fn persistence_snapshot(&self, project_id: Option<ProjectId>) -> Result<Vec<Task>> {
        self.persistence.list_tasks_by_project(project_id)
    }

    /// Rewrites `depends_on`, rejecting the write if it would introduce a
    /// cycle (§3.1 "cycles among depends_on are forbidden").
    pub fn update_task_dependencies(&self, task_id: TaskId, depends_on: Vec<TaskId>) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        self.reject_if_cycle(task.project_id, Some(task_id), &depends_on)?;
        let expected = task.status;
        task.depends_on = depends_on;
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        Ok(task)
    }

    fn dependency_statuses(&self, task: &Task) -> Result<Vec<TaskStatus>> {
        task.depends_on
            .iter()
            .map(|id| self.persistence.get_task(*id).map(|t| t.status))
            .collect()
    }

    pub fn list_ready_tasks(&self, project_id: Option<ProjectId>) -> Result<Vec<Task>> {
        let all = self.persistence.list_tasks_by_project(project_id)?;
        let by_id: HashMap<TaskId, TaskStatus> = all.iter().map(|t| (t.id, t.status)).collect();
        let mut ready: Vec<Task> = all
            .into_iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.depends_on.iter().all(|d| by_id.get(d) == Some(&TaskStatus::Completed))
            })
            .collect();
        sort_by_tie_break(&mut ready);
        Ok(ready)
    }

    /// Highest-priority ready task per the §4.2 tie-break.
    pub fn suggest_next_task(&self, project_id: Option<ProjectId>) -> Result<Option<Task>> {
        Ok(self.list_ready_tasks(project_id)?.into_iter().next())
    }

    pub fn update_task_status(&self, task_id: TaskId, new_status: TaskStatus, _actor_session_id: SessionId) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        if !status::transition_allowed(task.status, new_status) {
            return Err(GobbyError::InvalidState(format!(
                "cannot transition task {task_id} from {:?} to {:?}",
                task.status, new_status
            )));
        }
        let expected = task.status;
        task.status = new_status;
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        self.changed.notify_waiters();
        Ok(task)
    }

    /// Agent-authored closes land in `pending_review`; human/root closes
    /// complete directly (§3.1, §9 decision 2).
    pub fn close_task(&self, task_id: TaskId, commit_sha: Option<String>, actor: &Session) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        let target = if actor.agent_depth > 0 { TaskStatus::PendingReview } else { TaskStatus::Completed };
        if !status::transition_allowed(task.status, target) {
            return Err(GobbyError::InvalidState(format!(
                "cannot close task {task_id} from {:?}", task.status
            )));
        }
        if target == TaskStatus::Completed {
            for dep in &task.depends_on {
                let dep_task = self.persistence.get_task(*dep)?;
                if dep_task.status != TaskStatus::Completed {
                    return Err(GobbyError::InvalidState(format!(
                        "task {task_id} has incomplete dependency {dep}"
                    )));
                }
            }
        }
        let expected = task.status;
        task.status = target;
        task.commit_sha = commit_sha;
        task.assigned_session_id = Some(actor.id);
        if target == TaskStatus::PendingReview {
            task.pending_review_at = Some(Utc::now());
        }
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        self.changed.notify_waiters();
        info!(task_id = %task_id, status = ?task.status, "task closed");
        Ok(task)
    }

    /// From `pending_review` back to `in_progress`; clears `commit_sha`.
    pub fn reopen_task(&self, task_id: TaskId, _reason: Option<String>) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        if task.status != TaskStatus::PendingReview {
            return Err(GobbyError::InvalidState(format!(
                "task {task_id} is not pending_review (status {:?})", task.status
            )));
        }
        let expected = task.status;
        task.status = TaskStatus::InProgress;
        task.commit_sha = None;
        task.pending_review_at = None;
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        self.changed.notify_waiters();
        Ok(task)
    }

    /// Approves a `pending_review` task: a status transition only, no
    /// worktree merge (§9 decision 2).
    pub fn approve_task(&self, task_id: TaskId) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        if task.status != TaskStatus::PendingReview {
            return Err(GobbyError::InvalidState(format!(
                "task {task_id} is not pending_review (status {:?})", task.status
            )));
        }
        let expected = task.status;
        task.status = TaskStatus::Completed;
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        self.changed.notify_waiters();
        Ok(task)
    }

    /// Increments `validation_fail_count` on failure and escalates once the
    /// configured limit is reached.
    pub fn validate_task(&self, task_id: TaskId, passed: bool) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        let expected = task.status;
        if passed {
            return Ok(task);
        }
        task.validation_fail_count += 1;
        if task.validation_fail_count >= self.validation_fail_limit {
            task.status = TaskStatus::Escalated;
            warn!(task_id = %task_id, "task escalated after validation failures");
        }
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        self.changed.notify_waiters();
        Ok(task)
    }

    /// Idempotent (§8): a no-op when already enriched and `force` is false.
    pub fn enrich_task(&self, task_id: TaskId, expansion_context: String, force: bool) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        if task.is_enriched && !force {
            return Ok(task);
        }
        let expected = task.status;
        task.expansion_context = Some(expansion_context);
        task.is_enriched = true;
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        Ok(task)
    }

    /// Idempotent (§8): returns the existing children without creating more
    /// when already expanded and `force` is false.
    pub fn expand_task(
        &self,
        parent_id: TaskId,
        subtasks: Vec<(String, String)>,
        actor_session_id: SessionId,
        force: bool,
    ) -> Result<Vec<Task>> {
        let mut parent = self.persistence.get_task(parent_id)?;
        if parent.is_expanded && !force {
            let all = self.persistence.list_tasks_by_project(parent.project_id)?;
            return Ok(all.into_iter().filter(|t| t.parent_task_id == Some(parent_id)).collect());
        }
        let mut children = Vec::with_capacity(subtasks.len());
        for (title, description) in subtasks {
            let mut child = {
                let now = Utc::now();
                Task {
                    id: TaskId::new(),
                    project_id: parent.project_id,
                    seq_num: self.persistence.next_seq_num(parent.project_id)?,
                    title,
                    description,
                    status: TaskStatus::Pending,
                    parent_task_id: Some(parent_id),
                    depends_on: vec![],
                    category: parent.category,
                    priority: parent.priority,
                    validation_criteria: None,
                    validation_fail_count: 0,
                    reference_doc: None,
                    expansion_context: None,
                    is_enriched: false,
                    is_expanded: false,
                    is_tdd_applied: false,
                    commit_sha: None,
                    created_in_session_id: actor_session_id,
                    assigned_session_id: None,
                    pending_review_at: None,
                    created_at: now,
                    updated_at: now,
                }
            };
            child.updated_at = Utc::now();
            self.persistence.insert_task(&child)?;
            children.push(child);
        }
        let expected = parent.status;
        parent.is_expanded = true;
        parent.updated_at = Utc::now();
        self.persistence.update_task(&parent, expected)?;
        Ok(children)
    }

    /// Idempotent (§8): a no-op when TDD criteria are already applied and
    /// `force` is false.
    pub fn apply_tdd(&self, task_id: TaskId, validation_criteria: String, force: bool) -> Result<Task> {
        let mut task = self.persistence.get_task(task_id)?;
        if task.is_tdd_applied && !force {
            return Ok(task);
        }
        let expected = task.status;
        task.validation_criteria = Some(validation_criteria);
        task.is_tdd_applied = true;
        task.updated_at = Utc::now();
        self.persistence.update_task(&task, expected)?;
        Ok(task)
    }

    pub async fn wait_for_task(&self, task_id: TaskId, timeout_s: u64) -> Result<Task> {
        self.wait_for_any_task(&[task_id], timeout_s).await
    }

    /// Returns as soon as any listed task leaves `in_progress`, or on
    /// timeout returns the current state of the first such task found
    /// (§8 boundary: `timeout=0` returns immediately with current state).
    pub async fn wait_for_any_task(&self, task_ids: &[TaskId], timeout_s: u64) -> Result<Task> {
        let deadline = StdDuration::from_secs(timeout_s);
        let check = || -> Result<Option<Task>> {
            for &id in task_ids {
                let t = self.persistence.get_task(id)?;
                if t.status != TaskStatus::InProgress {
                    return Ok(Some(t));
                }
            }
            Ok(None)
        };
        if let Some(t) = check()? {
            return Ok(t);
        }
        if timeout_s == 0 {
            return self.persistence.get_task(task_ids[0]);
        }
        let wait = async {
            loop {
                self.changed.notified().await;
                if let Some(t) = check()? {
                    return Ok(t);
                }
            }
        };
        match timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => self.persistence.get_task(task_ids[0]),
        }
    }

    pub async fn wait_for_all_tasks(&self, task_ids: &[TaskId], timeout_s: u64) -> Result<Vec<Task>> {
        let deadline = StdDuration::from_secs(timeout_s);
        let check = |graph: &Self| -> Result<Option<Vec<Task>>> {
            let tasks: Vec<Task> = task_ids.iter().map(|id| graph.persistence.get_task(*id)).collect::<Result<_>>()?;
            if tasks.iter().all(|t| t.status != TaskStatus::InProgress) {
                Ok(Some(tasks))
            } else {
                Ok(None)
            }
        };
        if let Some(tasks) = check(self)? {
            return Ok(tasks);
        }
        if timeout_s == 0 {
            return task_ids.iter().map(|id| self.persistence.get_task(*id)).collect();
        }
        let wait = async {
            loop {
                self.changed.notified().await;
                if let Some(tasks) = check(self)? {
                    return Ok(tasks);
                }
            }
        };
        match timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => task_ids.iter().map(|id| self.persistence.get_task(*id)).collect(),
        }
    }
}

/// §4.2 tie-break: priority desc, `category == code` preferred, least
/// recently created, deterministic id order.
fn sort_by_tie_break(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| {
                let a_code = a.category == Some(TaskCategory::Code);
                let b_code = b.category == Some(TaskCategory::Code);
                b_code.cmp(&a_code)
            })
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.as_uuid().cmp(&b.id.as_uuid()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionSource;

    fn graph() -> (TaskGraph, SessionId) {
        let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
        let session = Session::new_root(SessionSource::Claude, None, "m1".into());
        pm.insert_session(&session).unwrap();
        (TaskGraph::new(pm, DEFAULT_VALIDATION_FAIL_LIMIT), session.id)
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "a".into(), "".into(), vec![], None, 0, sid).unwrap();
        let t2 = g.create_task(None, "b".into(), "".into(), vec![t1.id], None, 0, sid).unwrap();
        let t3 = g.create_task(None, "c".into(), "".into(), vec![t2.id], None, 0, sid).unwrap();
        assert_eq!(t3.depends_on, vec![t2.id]);

        // Rewiring t1 to depend on t3 would close a cycle t1 -> t3 -> t2 -> t1.
        let err = g.update_task_dependencies(t1.id, vec![t3.id]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CycleDetected);
    }

    #[test]
    fn s2_dependency_readiness() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "#1".into(), "".into(), vec![], None, 0, sid).unwrap();
        let t2 = g.create_task(None, "#2".into(), "".into(), vec![t1.id], None, 0, sid).unwrap();
        let t3 = g.create_task(None, "#3".into(), "".into(), vec![t2.id], None, 0, sid).unwrap();

        g.update_task_status(t1.id, TaskStatus::InProgress, sid).unwrap();
        let session = Session {
            agent_depth: 0,
            ..Session::new_root(SessionSource::Claude, None, "m1".into())
        };
        let mut root = session;
        root.id = sid;
        g.close_task(t1.id, None, &root).unwrap();

        let ready: Vec<TaskId> = g.list_ready_tasks(None).unwrap().into_iter().map(|t| t.id).collect();
        assert!(ready.contains(&t2.id));
        assert!(!ready.contains(&t3.id));

        g.update_task_status(t2.id, TaskStatus::InProgress, sid).unwrap();
        g.close_task(t2.id, None, &root).unwrap();
        let ready: Vec<TaskId> = g.list_ready_tasks(None).unwrap().into_iter().map(|t| t.id).collect();
        assert!(ready.contains(&t3.id));
    }

    #[test]
    fn s1_review_gate() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "#1".into(), "".into(), vec![], Some(TaskCategory::Code), 0, sid).unwrap();
        g.update_task_status(t1.id, TaskStatus::InProgress, sid).unwrap();

        let mut child = Session::new_child(SessionSource::Claude, None, "m1".into(), &{
            let mut parent = Session::new_root(SessionSource::Claude, None, "m1".into());
            parent.id = sid;
            parent
        }, crate::ids::AgentRunId::new());
        child.agent_depth = 1;

        let closed = g.close_task(t1.id, Some("abc123".into()), &child).unwrap();
        assert_eq!(closed.status, TaskStatus::PendingReview);
        assert_eq!(closed.commit_sha.as_deref(), Some("abc123"));
        assert!(closed.pending_review_at.is_some());

        let reopened = g.reopen_task(t1.id, Some("missing tests".into())).unwrap();
        assert_eq!(reopened.status, TaskStatus::InProgress);
        assert!(reopened.commit_sha.is_none());
    }

    #[test]
    fn validation_escalates_after_limit() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "#1".into(), "".into(), vec![], None, 0, sid).unwrap();
        g.update_task_status(t1.id, TaskStatus::InProgress, sid).unwrap();
        for _ in 0..DEFAULT_VALIDATION_FAIL_LIMIT - 1 {
            let t = g.validate_task(t1.id, false).unwrap();
            assert_eq!(t.status, TaskStatus::InProgress);
        }
        let t = g.validate_task(t1.id, false).unwrap();
        assert_eq!(t.status, TaskStatus::Escalated);
    }

    #[tokio::test]
    async fn wait_for_task_returns_immediately_on_zero_timeout() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "#1".into(), "".into(), vec![], None, 0, sid).unwrap();
        let result = g.wait_for_task(t1.id, 0).await.unwrap();
        assert_eq!(result.status, TaskStatus::Pending);
    }

    #[test]
    fn enrich_task_is_idempotent_without_force() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "#1".into(), "".into(), vec![], None, 0, sid).unwrap();
        let enriched = g.enrich_task(t1.id, "context A".into(), false).unwrap();
        assert_eq!(enriched.expansion_context.as_deref(), Some("context A"));

        let unchanged = g.enrich_task(t1.id, "context B".into(), false).unwrap();
        assert_eq!(unchanged.expansion_context.as_deref(), Some("context A"));

        let forced = g.enrich_task(t1.id, "context B".into(), true).unwrap();
        assert_eq!(forced.expansion_context.as_deref(), Some("context B"));
    }

    #[test]
    fn expand_task_creates_children_once() {
        let (g, sid) = graph();
        let parent = g.create_task(None, "parent".into(), "".into(), vec![], None, 0, sid).unwrap();
        let children = g
            .expand_task(parent.id, vec![("sub1".into(), "".into()), ("sub2".into(), "".into())], sid, false)
            .unwrap();
        assert_eq!(children.len(), 2);

        let again = g.expand_task(parent.id, vec![("sub3".into(), "".into())], sid, false).unwrap();
        assert_eq!(again.len(), 2, "re-expansion without force must not create more children");
    }

    #[test]
    fn apply_tdd_is_idempotent_without_force() {
        let (g, sid) = graph();
        let t1 = g.create_task(None, "#1".into(), "".into(), vec![], None, 0, sid).unwrap();
        g.apply_tdd(t1.id, "criteria A".into(), false).unwrap();
        let unchanged = g.apply_tdd(t1.id, "criteria B".into(), false).unwrap();
        assert_eq!(unchanged.validation_criteria.as_deref(), Some("criteria A"));
    }
}
