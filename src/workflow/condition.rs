//! Condition functions available to `when` expressions (§4.1 step 1): e.g.
//! `task_tree_complete(task_id)`, `user_says(keyword)`, `is_test_file(path)`.
//!
//! These reach into the task graph and the current event's prompt/tool
//! input; callers supply an implementation bound to the live managers so
//! the evaluator itself stays free of direct persistence access.

use crate::ids::{ProjectId, TaskId};
use crate::model::TaskStatus;
use crate::task_graph::TaskGraph;

pub trait ConditionProvider {
    fn task_tree_complete(&self, task_id: TaskId) -> bool;
    fn user_says(&self, keyword: &str) -> bool;
    fn is_test_file(&self, path: &str) -> bool;
}

/// Default provider backed by the live task graph and the current event's
/// user-visible text / tool-input path.
pub struct LiveConditionProvider<'a> {
    pub task_graph: &'a TaskGraph,
    pub project_id: Option<ProjectId>,
    pub user_text: Option<&'a str>,
    pub tool_path: Option<&'a str>,
}

impl<'a> ConditionProvider for LiveConditionProvider<'a> {
    fn task_tree_complete(&self, task_id: TaskId) -> bool {
        let Ok(root) = self.task_graph.get_task(task_id) else {
            return false;
        };
        if root.status != TaskStatus::Completed {
            return false;
        }
        let Ok(all) = self.task_graph.persistence_snapshot(self.project_id) else {
            return true;
        };
        all.iter()
            .filter(|t| t.parent_task_id == Some(task_id))
            .all(|t| t.status == TaskStatus::Completed)
    }

    fn user_says(&self, keyword: &str) -> bool {
        self.user_text
            .map(|text| text.to_lowercase().contains(&keyword.to_lowercase()))
            .unwrap_or(false)
    }

    fn is_test_file(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        lower.contains("test") || lower.contains("spec.")
    }
}

pub struct StaticConditionProvider {
    pub task_tree_complete: bool,
    pub user_says: bool,
    pub is_test_file: bool,
}

impl ConditionProvider for StaticConditionProvider {
    fn task_tree_complete(&self, _task_id: TaskId) -> bool {
        self.task_tree_complete
    }
    fn user_says(&self, _keyword: &str) -> bool {
        self.user_says
    }
    fn is_test_file(&self, _path: &str) -> bool {
        self.is_test_file
    }
}
