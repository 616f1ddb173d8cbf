//! Wiring of the HTTP source, the catalog and the scheduler into one process.

use std::io;
use std::sync::Arc;

use mta_sync_client::{EnvToken, MtaClient, StaticToken, TokenSource};
use mta_sync_core::{
    ApplicationSource, ConfigError, DistributedLease, EntityProviderConnection, PeriodicRunner,
    ReconciliationEngine, SourceError, SyncSettings,
};
use mta_sync_memory::{InMemoryCatalog, LocalLease};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot create MTA client: {0}")]
    Client(#[from] SourceError),
}

pub fn build_engine<S, C>(
    settings: &SyncSettings,
    source: Arc<S>,
    connection: Arc<C>,
) -> Arc<ReconciliationEngine<S, C>>
where
    S: ApplicationSource,
    C: EntityProviderConnection,
{
    Arc::new(ReconciliationEngine::new(
        source,
        connection,
        settings.entity_mapper(),
        settings.engine_options(),
    ))
}

pub fn build_runner<S, C>(
    settings: &SyncSettings,
    engine: Arc<ReconciliationEngine<S, C>>,
    lease: Arc<dyn DistributedLease>,
) -> PeriodicRunner
where
    S: ApplicationSource + 'static,
    C: EntityProviderConnection + 'static,
{
    PeriodicRunner::new(
        engine,
        lease,
        settings.schedule.clone(),
        settings.retry.clone(),
    )
}

/// A provider instance mirroring the hub into the in-process catalog.
pub struct SyncApp {
    engine: Arc<ReconciliationEngine<MtaClient, InMemoryCatalog>>,
    catalog: Arc<InMemoryCatalog>,
    runner: PeriodicRunner,
}

impl SyncApp {
    pub fn build(cfg: &AppConfig) -> Result<Self, AppError> {
        let settings = cfg.settings()?;

        let tokens: Arc<dyn TokenSource> = match cfg.mta.token_env.as_deref() {
            Some(var) if !var.is_empty() => Arc::new(EnvToken::new(var)),
            _ => Arc::new(StaticToken::none()),
        };
        let client = MtaClient::new(
            settings.mapper.base_url.clone(),
            tokens,
            settings.request_timeout,
        )?;

        let catalog = Arc::new(InMemoryCatalog::new());
        let engine = build_engine(&settings, Arc::new(client), catalog.clone());
        let runner = build_runner(&settings, engine.clone(), Arc::new(LocalLease::new()));

        info!(
            provider = %engine.provider_name(),
            hub = %settings.mapper.base_url,
            frequency_secs = settings.schedule.frequency.as_secs(),
            timeout_secs = settings.schedule.timeout.as_secs(),
            "Provider configured"
        );

        Ok(Self {
            engine,
            catalog,
            runner,
        })
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.runner.run(shutdown).await;

        let state = self.engine.state().await;
        info!(
            provider = %self.engine.provider_name(),
            runs = state.runs_total,
            entities = state.last_entity_names.len(),
            mutations = self.catalog.mutation_count(),
            "Provider stopped"
        );
    }
}

/// Cancels `shutdown` on Ctrl-C, or on SIGTERM where the platform has it.
///
/// The SIGTERM handler is installed before this returns, so a signal that
/// arrives afterwards is never lost to the default handler.
pub fn spawn_shutdown_listener(shutdown: CancellationToken) -> io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!(signal = "SIGINT", "Shutdown signal received"),
            _ = terminated => info!(signal = "SIGTERM", "Shutdown signal received"),
        }
        shutdown.cancel();
    }))
}
