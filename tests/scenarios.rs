//! End-to-end scenario tests (§8 S1-S6), exercised through the
//! `tools::ToolDispatcher` edge rather than the managers directly, since
//! that is the surface real callers (spawned agents) actually use.

use gobby::hooks::HookIngress;
use gobby::messaging::MessagingBus;
use gobby::model::{AgentMode, NotifyTarget, OnCrash, Session, SessionSource};
use gobby::party::{PartyScheduler, RoleSpec};
use gobby::persistence::PersistenceManager;
use gobby::pipeline::{NoopMcpToolCaller, PipelineExecutor, PipelineRegistry};
use gobby::registry::AgentRegistry;
use gobby::task_graph::TaskGraph;
use gobby::tools::{Managers, ToolDispatcher};
use gobby::workflow::definition::WorkflowRegistry;
use gobby::workflow::eval::WorkflowEngine;
use gobby::workflow::StopSignalRegistry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(pm: Arc<PersistenceManager>) -> ToolDispatcher {
    let registry = Arc::new(AgentRegistry::new(pm.clone(), Duration::from_millis(50)));
    let messaging = Arc::new(MessagingBus::new(pm.clone()));
    ToolDispatcher::new(Managers {
        task_graph: Arc::new(TaskGraph::new(pm.clone(), 3)),
        registry: registry.clone(),
        workflow_engine: Arc::new(WorkflowEngine::new(WorkflowRegistry::from_definitions(vec![]), pm.clone())),
        party_scheduler: Arc::new(PartyScheduler::new(pm.clone(), registry.clone(), messaging.clone())),
        messaging: messaging.clone(),
        hook_ingress: Arc::new(HookIngress::new(pm.clone())),
        pipeline_executor: Arc::new(PipelineExecutor::new(PipelineRegistry::new(vec![]), Arc::new(NoopMcpToolCaller))),
        stop_signals: Arc::new(StopSignalRegistry::new()),
        persistence: pm,
        max_agent_depth: 5,
    })
}

fn root_session(pm: &PersistenceManager) -> Session {
    let s = Session::new_root(SessionSource::Claude, None, "m1".into());
    pm.insert_session(&s).unwrap();
    s
}

/// S1 — Review gate.
#[tokio::test]
async fn s1_review_gate_round_trip() {
    let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
    let parent = root_session(&pm);
    let d = dispatcher(pm.clone());

    let task = d
        .dispatch(
            "tasks.create_task",
            json!({
                "project_id": null, "title": "t1", "description": "d1",
                "depends_on": [], "category": "code", "priority": 0,
                "created_in_session_id": parent.id,
            }),
        )
        .await
        .unwrap();
    let task_id = task["id"].clone();

    let (spawn, child) = {
        let res = d
            .dispatch(
                "agents.start_agent",
                json!({
                    "parent_session_id": parent.id, "provider": "true", "model": null,
                    "mode": "headless", "workflow": null, "task_id": task_id, "prompt": "do it",
                    "worktree_id": null, "session_context_mode": "none", "variables": {}, "timeout_s": 60,
                }),
            )
            .await
            .unwrap();
        (res["run_id"].clone(), res["child_session"].clone())
    };
    let _ = spawn;
    let child: Session = serde_json::from_value(child).unwrap();
    assert_eq!(child.agent_depth, 1);

    let closed = d
        .dispatch(
            "tasks.close_task",
            json!({ "task_id": task_id, "commit_sha": "abc123", "actor": child }),
        )
        .await
        .unwrap();
    assert_eq!(closed["status"], json!("pending_review"));
    assert_eq!(closed["commit_sha"], json!("abc123"));
    assert!(closed["pending_review_at"].is_string());

    let reopened = d
        .dispatch("tasks.reopen_task", json!({ "task_id": task_id, "reason": "missing tests" }))
        .await
        .unwrap();
    assert_eq!(reopened["status"], json!("in_progress"));
    assert!(reopened["commit_sha"].is_null());
}

/// S2 — Dependency readiness.
#[tokio::test]
async fn s2_dependency_readiness_unlocks_one_level_at_a_time() {
    let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
    let root = root_session(&pm);
    let d = dispatcher(pm.clone());

    let mk = |title: &str, depends_on: Vec<serde_json::Value>| {
        json!({
            "project_id": null, "title": title, "description": "d",
            "depends_on": depends_on, "category": "code", "priority": 0,
            "created_in_session_id": root.id,
        })
    };

    let t1 = d.dispatch("tasks.create_task", mk("t1", vec![])).await.unwrap();
    let t1_id = t1["id"].clone();
    let t2 = d.dispatch("tasks.create_task", mk("t2", vec![t1_id.clone()])).await.unwrap();
    let t2_id = t2["id"].clone();
    let _t3 = d.dispatch("tasks.create_task", mk("t3", vec![t2_id.clone()])).await.unwrap();

    d.dispatch(
        "tasks.update_task_status",
        json!({ "task_id": t1_id, "status": "in_progress", "actor_session_id": root.id }),
    )
    .await
    .unwrap();
    d.dispatch("tasks.close_task", json!({ "task_id": t1_id, "commit_sha": null, "actor": root }))
        .await
        .unwrap();

    let ready = d.dispatch("tasks.list_ready_tasks", json!({ "project_id": null })).await.unwrap();
    let titles: Vec<String> = ready.as_array().unwrap().iter().map(|t| t["title"].as_str().unwrap().to_string()).collect();
    assert_eq!(titles, vec!["t2"]);

    d.dispatch(
        "tasks.update_task_status",
        json!({ "task_id": t2_id, "status": "in_progress", "actor_session_id": root.id }),
    )
    .await
    .unwrap();
    d.dispatch("tasks.close_task", json!({ "task_id": t2_id, "commit_sha": null, "actor": root }))
        .await
        .unwrap();

    let ready = d.dispatch("tasks.list_ready_tasks", json!({ "project_id": null })).await.unwrap();
    let titles: Vec<String> = ready.as_array().unwrap().iter().map(|t| t["title"].as_str().unwrap().to_string()).collect();
    assert_eq!(titles, vec!["t3"]);
}

/// S5 — Terminal kill via marker: spawns a real child process, deposits its
/// pid as `terminal_context.parent_pid` (the `session_start` hook's job in
/// production), and confirms `kill_agent` finds and kills it.
#[tokio::test]
async fn s5_terminal_kill_via_discovered_pid() {
    let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
    let parent = root_session(&pm);
    let registry = Arc::new(AgentRegistry::new(pm.clone(), Duration::from_millis(200)));

    let mut child_proc = std::process::Command::new("sleep").arg("30").spawn().expect("spawn sleep");
    let pid = child_proc.id();

    let req = gobby::registry::SpawnRequest {
        provider: "claude".into(),
        model: None,
        mode: AgentMode::Terminal,
        workflow: None,
        task_id: None,
        prompt: "terminal agent".into(),
        worktree_id: None,
        session_context_mode: gobby::registry::SessionContextMode::None,
        variables: Default::default(),
        timeout: Duration::from_secs(60),
    };
    let (spawn_result, mut child) = registry.spawn(&parent, req, 5).unwrap();
    child.terminal_context.insert("parent_pid".into(), json!(pid));
    pm.update_session(&child).unwrap();

    let (discovered, via) = gobby::registry::pid::discover(&child);
    assert_eq!(via, gobby::registry::pid::FoundVia::TerminalContext);
    assert_eq!(discovered.unwrap().pid, pid);

    let handle = gobby::registry::mode::RunHandle::Terminal {
        session_marker: gobby::registry::pid::marker_for(&child.id.to_string()),
        process: Some(gobby::registry::process::ProcessHandle::new(pid)),
    };
    registry.mark_running(spawn_result.run_id, handle).unwrap();

    let already_dead = registry.kill_agent(spawn_result.run_id).await.unwrap();
    assert!(!already_dead);

    let run = registry.get_run(spawn_result.run_id).unwrap();
    assert_eq!(run.status, gobby::model::AgentRunStatus::Killed);
    assert!(child_proc.try_wait().unwrap().is_some(), "child process should have exited");
}

/// S6 — Party DAG: leader spawns first, then two devs concurrently, qa only
/// once both devs complete.
#[tokio::test]
async fn s6_party_dag_through_the_tool_surface() {
    let pm = Arc::new(PersistenceManager::open_in_memory().unwrap());
    let founder = root_session(&pm);
    let d = dispatcher(pm.clone());
    let sched = PartyScheduler::new(
        pm.clone(),
        Arc::new(AgentRegistry::new(pm.clone(), Duration::from_millis(50))),
        Arc::new(MessagingBus::new(pm.clone())),
    );

    let roles = vec![
        RoleSpec { role: "leader".into(), depends_on: vec![], count: 1, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, retry_attempts: 0 },
        RoleSpec { role: "dev".into(), depends_on: vec!["leader".into()], count: 2, on_crash: OnCrash::Restart, notify: NotifyTarget::Party, retry_attempts: 1 },
        RoleSpec { role: "qa".into(), depends_on: vec!["dev".into()], count: 1, on_crash: OnCrash::Abort, notify: NotifyTarget::Party, retry_attempts: 0 },
    ];

    let project_id = gobby::ids::ProjectId::new();
    let party = d
        .dispatch(
            "party.launch_party",
            json!({ "project_id": project_id, "founder_session_id": founder.id, "name": "release", "roles": roles }),
        )
        .await
        .unwrap();
    let party_id = party["id"].clone();

    let status = d.dispatch("party.get_party_status", json!({ "party_id": party_id })).await.unwrap();
    assert_eq!(status["status"], json!("forming"));

    let run_id = gobby::ids::AgentRunId::new();
    let session_id = gobby::ids::SessionId::new();
    d.dispatch(
        "party.signal_role",
        json!({ "party_id": party_id, "role": "leader", "index": 0, "signal": "running", "agent_run_id": run_id, "session_id": session_id }),
    )
    .await
    .unwrap();
    let after_leader_running = d.dispatch("party.signal_role", json!({
        "party_id": party_id, "role": "leader", "index": 0, "signal": "completed",
    })).await.unwrap();
    assert_eq!(after_leader_running["status"], json!("active"));

    let party: gobby::model::Party = serde_json::from_value(after_leader_running).unwrap();
    let ready = sched.ready_roles(&party);
    assert_eq!(ready, vec!["dev".to_string()]);

    for idx in 0..2 {
        d.dispatch(
            "party.signal_role",
            json!({ "party_id": party_id, "role": "dev", "index": idx, "signal": "completed" }),
        )
        .await
        .unwrap();
        if idx == 0 {
            let status = d.dispatch("party.get_party_status", json!({ "party_id": party_id })).await.unwrap();
            let party: gobby::model::Party = serde_json::from_value(status).unwrap();
            assert!(sched.ready_roles(&party).is_empty(), "qa must not be ready until both devs complete");
        }
    }

    let status = d.dispatch("party.get_party_status", json!({ "party_id": party_id })).await.unwrap();
    let party: gobby::model::Party = serde_json::from_value(status).unwrap();
    assert_eq!(sched.ready_roles(&party), vec!["qa".to_string()]);
}
