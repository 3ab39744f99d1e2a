//! Application state.

use anyhow::Context;
use shipyard_config::{ArtifactBackend, StackConfig};
use shipyard_core::artifact::ArtifactStore;
use shipyard_core::deployer::{DeployTarget, Deployer};
use shipyard_core::secret::{EnvSecretStore, SecretStore};
use shipyard_core::store::RunStore;
use shipyard_db::{PgRunStore, create_pool, run_migrations};
use shipyard_deployer::KubernetesDeployer;
use shipyard_executor::{GitSource, LocalDockerExecutor};
use shipyard_scheduler::{
    BuildStage, DeployStage, FsArtifactStore, MemoryArtifactStore, MemoryRunStore,
    PipelineOrchestrator, PipelineSettings, SourceStage, StageRunners,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PipelineOrchestrator,
    pub stack: Arc<StackConfig>,
    pub deployer: Arc<dyn Deployer>,
    /// Resolved webhook signing secret.
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        orchestrator: PipelineOrchestrator,
        stack: StackConfig,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            orchestrator,
            stack: Arc::new(stack),
            deployer,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn deploy_target(&self) -> DeployTarget {
        self.stack.pipeline.deploy.target()
    }

    /// Wire the production collaborators for `stack`: Docker builds,
    /// Kubernetes rollouts, git sources and env secrets. Runs go to
    /// PostgreSQL when `database_url` is given and stay in memory otherwise.
    pub async fn from_stack(stack: StackConfig, database_url: Option<&str>) -> anyhow::Result<Self> {
        let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore);
        let pipeline = &stack.pipeline;

        let runs: Arc<dyn RunStore> = match database_url {
            Some(url) => {
                info!("Connecting to database...");
                let pool = create_pool(url).await.context("connecting to database")?;
                run_migrations(&pool).await.context("running migrations")?;
                info!("Database connected");
                Arc::new(PgRunStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set, runs are kept in memory");
                Arc::new(MemoryRunStore::new())
            }
        };

        let artifacts: Arc<dyn ArtifactStore> = match stack.artifacts.backend {
            ArtifactBackend::Memory => Arc::new(MemoryArtifactStore::new()),
            ArtifactBackend::Fs => {
                let root = stack
                    .artifacts
                    .path
                    .clone()
                    .context("fs artifact backend needs a path")?;
                tokio::fs::create_dir_all(&root)
                    .await
                    .with_context(|| format!("creating artifact root {}", root.display()))?;
                Arc::new(FsArtifactStore::new(root))
            }
        };

        let mut source = GitSource::new(pipeline.source.repository.clone(), secrets.clone());
        if let Some(path) = &pipeline.source.token_secret {
            source = source.with_token_secret(path.clone());
        }
        let executor = LocalDockerExecutor::new().context("connecting to Docker")?;
        let deployer: Arc<dyn Deployer> = Arc::new(
            KubernetesDeployer::new()
                .await
                .context("connecting to Kubernetes")?,
        );

        let runners = StageRunners {
            source: Arc::new(SourceStage::new(Arc::new(source))),
            build: Arc::new(BuildStage::new(
                Arc::new(executor),
                secrets.clone(),
                pipeline.clone(),
            )),
            deploy: Arc::new(DeployStage::new(deployer.clone(), pipeline.deploy.target())),
        };
        let orchestrator = PipelineOrchestrator::new(
            PipelineSettings::from_config(pipeline),
            runs,
            artifacts,
            runners,
        );

        let webhook_secret = match &stack.server.webhook_secret {
            Some(path) => Some(
                secrets
                    .get(path)
                    .await
                    .with_context(|| format!("reading webhook secret {}", path))?,
            ),
            None => None,
        };

        let mut state = AppState::new(orchestrator, stack, deployer);
        state.webhook_secret = webhook_secret;
        Ok(state)
    }
}
