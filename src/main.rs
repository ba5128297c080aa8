use clap::Parser;
use gobby::config::{Args, Command, ConfigDiscovery, GobbyConfig};
use gobby::env;
use gobby::hooks::HookIngress;
use gobby::messaging::MessagingBus;
use gobby::party::PartyScheduler;
use gobby::persistence::PersistenceManager;
use gobby::pipeline::{NoopMcpToolCaller, PipelineExecutor, PipelineRegistry};
use gobby::registry::AgentRegistry;
use gobby::task_graph::TaskGraph;
use gobby::tools::{serve_stdio, Managers, ToolDispatcher};
use gobby::workflow::definition::WorkflowRegistry;
use gobby::workflow::eval::WorkflowEngine;
use gobby::workflow::StopSignalRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = ConfigDiscovery::discover(args.config.as_deref())?;

    tracing_subscriber::fmt().with_env_filter(config.log_filter.clone()).init();

    let workspace_root = args.workspace.clone().unwrap_or_else(|| config.workspace_root.clone());

    match args.command.unwrap_or(Command::Serve) {
        Command::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::ListReady => {
            let persistence = open_persistence(&workspace_root, &config)?;
            let task_graph = TaskGraph::new(persistence, config.validation_fail_limit);
            for task in task_graph.list_ready_tasks(None)? {
                println!("#{} {} (priority {})", task.seq_num, task.title, task.priority);
            }
            Ok(())
        }
        Command::Serve => serve(&workspace_root, &config).await,
    }
}

fn open_persistence(workspace_root: &std::path::Path, _config: &GobbyConfig) -> anyhow::Result<Arc<PersistenceManager>> {
    std::fs::create_dir_all(env::gobby_dir_path(workspace_root))?;
    Ok(Arc::new(PersistenceManager::open(&env::db_file_path(workspace_root))?))
}

async fn serve(workspace_root: &std::path::Path, config: &GobbyConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(workspace = %workspace_root.display(), "starting gobbyd");

    let persistence = open_persistence(workspace_root, config)?;
    let task_graph = Arc::new(TaskGraph::new(persistence.clone(), config.validation_fail_limit));
    let registry = Arc::new(AgentRegistry::new(persistence.clone(), Duration::from_secs(config.kill_grace_secs)));
    let workflow_registry = WorkflowRegistry::from_definitions(vec![]);
    let workflow_engine = Arc::new(WorkflowEngine::new(workflow_registry, persistence.clone()));
    let messaging = Arc::new(MessagingBus::new(persistence.clone()));
    let party_scheduler = Arc::new(PartyScheduler::new(persistence.clone(), registry.clone(), messaging.clone()));
    let pipeline_executor = Arc::new(PipelineExecutor::new(PipelineRegistry::new(vec![]), Arc::new(NoopMcpToolCaller)));
    let hook_ingress = Arc::new(HookIngress::new(persistence.clone()));
    let stop_signals = Arc::new(StopSignalRegistry::new());

    let dispatcher = ToolDispatcher::new(Managers {
        persistence,
        task_graph,
        registry,
        workflow_engine,
        party_scheduler,
        messaging,
        hook_ingress,
        pipeline_executor,
        stop_signals,
        max_agent_depth: config.max_agent_depth_default,
    });

    info!("tool dispatch table ready, reading requests from stdin");
    serve_stdio(&dispatcher).await?;
    Ok(())
}
