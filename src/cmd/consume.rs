//! The long-running consumer: `devagent consume`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use devagent::analyzer::Analyzer;
use devagent::clients::{HttpConfigClient, HttpHostingClient};
use devagent::config::{AgentToml, SessionKind};
use devagent::consumer::RabbitConsumer;
use devagent::orchestrator::{Orchestrator, PipelineDeps};
use devagent::store::{DbHandle, WorkItemDb};
use devagent::supervisor::{
    ProcessBackend, SessionBackend, Supervisor, SupervisorConfig, TmuxBackend,
};
use devagent::vcs::{Git2Vcs, GitIdentity};
use devagent::workspace::WorkspaceManager;

const HOSTING_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire every collaborator from configuration.
pub fn build_orchestrator(config: &AgentToml) -> Result<Orchestrator> {
    let store = DbHandle::new(WorkItemDb::new(&config.store.path)?);
    let lookup = HttpConfigClient::new(
        &config.config_api.url,
        Duration::from_secs(config.config_api.timeout_secs),
    )?;
    let backend: Arc<dyn SessionBackend> = match config.generation.backend {
        SessionKind::Tmux => Arc::new(TmuxBackend::default()),
        SessionKind::Process => Arc::new(ProcessBackend::new()),
    };

    Ok(Orchestrator::new(PipelineDeps {
        store: Arc::new(store),
        config_lookup: Arc::new(lookup),
        analyzer: Analyzer::default(),
        vcs: Arc::new(Git2Vcs::new(config.git.auth_username.clone())),
        hosting: Arc::new(HttpHostingClient::new(HOSTING_TIMEOUT)?),
        supervisor: Supervisor::new(backend, SupervisorConfig::from(&config.generation)),
        workspaces: WorkspaceManager::new(config.workspace.root.clone()),
        identity: GitIdentity::from(&config.git),
        empty_diff: config.pipeline.empty_diff,
    }))
}

pub async fn cmd_consume(config: &AgentToml) -> Result<()> {
    for warning in config.validate() {
        warn!(%warning, "configuration warning");
    }

    let orchestrator = Arc::new(build_orchestrator(config)?);
    let consumer = RabbitConsumer::new(config.broker.clone(), orchestrator);

    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();
    let signals = tokio::spawn(watch_signals(shutdown.clone(), abort.clone()));

    info!(
        queue = %config.broker.work_queue,
        backend = ?config.generation.backend,
        "starting consumer"
    );
    let result = consumer.run(&shutdown, &abort).await;
    signals.abort();
    result?;
    Ok(())
}

/// First signal stops intake; a second one aborts the in-flight job.
async fn watch_signals(shutdown: CancellationToken, abort: CancellationToken) {
    if wait_for_signal().await.is_err() {
        return;
    }
    info!("shutdown requested, finishing current message (signal again to abort it)");
    shutdown.cancel();

    if wait_for_signal().await.is_err() {
        return;
    }
    warn!("second signal received, aborting in-flight job");
    abort.cancel();
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}
