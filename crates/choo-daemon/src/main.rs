//! `choo`: the daemon binary. Wires configuration, persistence, the
//! GitHub/provider/escalator stack, the Job Manager, and the control API
//! together, the way `everruns-control-plane/src/main.rs` wires its own
//! services and router before calling `axum::serve`.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use anyhow::{Context, Result};
use choo_daemon::{api, config::DaemonConfig, JobManager, PidFile};
use choo_github::{FakeGithubClient, GithubClient, GithubRestClient};
use choo_persistence::InMemoryStore;
use choo_worker::{Escalator, MultiEscalator, Provider, ProviderFactory, SubprocessProvider, TracingEscalator};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("choo_daemon=info".parse().unwrap()))
        .init();

    let cfg = DaemonConfig::from_env();
    tracing::info!(socket = %cfg.socket_path.display(), pid_file = %cfg.pid_file.display(), "choo daemon starting");

    let _pid_file = PidFile::acquire(&cfg.pid_file).context("failed to acquire pid file")?;

    let store = Arc::new(InMemoryStore::new());

    let github: Arc<dyn GithubClient> = match &cfg.github_token {
        Some(token) => Arc::new(GithubRestClient::new(token.clone())),
        None => {
            tracing::warn!("GITHUB_TOKEN not set; using an in-memory GitHub client stand-in (PRs will not reach real GitHub)");
            Arc::new(FakeGithubClient::new())
        }
    };

    let provider_command = std::env::var("CHOO_PROVIDER_COMMAND").unwrap_or_else(|_| "choo-provider".to_string());
    let provider_args: Vec<String> = std::env::var("CHOO_PROVIDER_ARGS")
        .ok()
        .map(|s| s.split(',').map(|a| a.trim().to_string()).collect())
        .unwrap_or_default();
    let provider_factory: ProviderFactory = Arc::new(move |_unit_id: &str| {
        Arc::new(SubprocessProvider::new(provider_command.clone(), provider_args.clone())) as Arc<dyn Provider>
    });

    let escalator: Arc<dyn Escalator> = Arc::new(MultiEscalator::new(vec![Arc::new(TracingEscalator)]));

    let manager = Arc::new(JobManager::new(&cfg, store, github, provider_factory, escalator));
    if let Err(e) = manager.resume().await {
        tracing::error!(error = %e, "resume() failed; continuing with a clean slate");
    }

    let state = api::AppState { manager: manager.clone() };
    let app = api::routes(state).layer(TraceLayer::new_for_http());

    if cfg.socket_path.exists() {
        std::fs::remove_file(&cfg.socket_path).context("failed to remove stale control socket")?;
    }
    if let Some(parent) = cfg.socket_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create socket directory")?;
    }
    let listener = tokio::net::UnixListener::bind(&cfg.socket_path).context("failed to bind control socket")?;
    std::fs::set_permissions(&cfg.socket_path, std::fs::Permissions::from_mode(0o600)).context("failed to set control socket permissions")?;

    tracing::info!(socket = %cfg.socket_path.display(), "control API listening");
    axum::serve(listener, app).await.context("control API server error")?;

    Ok(())
}
