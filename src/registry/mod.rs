//! Model registry
//!
//! Persists artifacts per (market, version), enforces strictly increasing
//! versions, and tracks which version is serving for each market.
//!
//! - Writes for one market (`register`, `promote`) hold that market's async
//!   mutex, so two trainings can never claim the same version or race a promotion
//! - The serving pointer is cached as an `Arc<ModelArtifact>` behind a
//!   read-write lock and swapped whole, so readers see either the old or the
//!   new artifact, never a mix

mod artifact;
mod file;
mod sqlite;
mod store;

pub use artifact::{ArtifactMetadata, ModelArtifact, PayloadDescriptor, Prediction, SampleCounts, ServingModel};
pub use file::FileStore;
pub use sqlite::SqliteStore;
pub use store::ArtifactStore;
#[cfg(test)]
pub use store::MockArtifactStore;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{PipelineError, Result};
use crate::types::{Market, ModelVersion};

pub struct ModelRegistry {
    store: Box<dyn ArtifactStore>,
    writers: HashMap<Market, Mutex<()>>,
    serving: RwLock<HashMap<Market, Arc<ModelArtifact>>>,
}

impl ModelRegistry {
    pub fn new(store: Box<dyn ArtifactStore>) -> Self {
        Self {
            store,
            writers: Market::ALL.iter().map(|m| (*m, Mutex::new(()))).collect(),
            serving: RwLock::new(HashMap::new()),
        }
    }

    /// Registry over the configured backend
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let store: Box<dyn ArtifactStore> = match config.backend {
            StorageBackend::File => Box::new(FileStore::open(&config.path).await?),
            StorageBackend::Sqlite => Box::new(SqliteStore::open(&config.path).await?),
        };
        tracing::info!(backend = store.name(), path = %config.path, "Model registry opened");
        Ok(Self::new(store))
    }

    fn writer(&self, market: Market) -> Result<&Mutex<()>> {
        self.writers
            .get(&market)
            .ok_or_else(|| PipelineError::Internal(format!("no writer lock for market {}", market)))
    }

    /// Persist `artifact` under its own version. The version must be new and
    /// greater than every version already registered for the market.
    pub async fn register(&self, artifact: ModelArtifact) -> Result<Arc<ModelArtifact>> {
        let _guard = self.writer(artifact.market)?.lock().await;
        let existing = self.store.versions(artifact.market).await?;
        self.put_locked(artifact, &existing).await
    }

    /// Allocate the next version from the newest registered one and persist
    /// the artifact `build` produces for it, all under the market's writer lock.
    ///
    /// Versioning follows the registered history rather than the serving
    /// pointer, so a rollback through [`ModelRegistry::promote`] never makes a
    /// later registration collide with an existing version.
    pub async fn register_next<N, B>(&self, market: Market, next_version: N, build: B) -> Result<Arc<ModelArtifact>>
    where
        N: FnOnce(Option<ModelVersion>) -> Result<ModelVersion>,
        B: FnOnce(ModelVersion) -> Result<ModelArtifact>,
    {
        let _guard = self.writer(market)?.lock().await;
        let existing = self.store.versions(market).await?;
        let version = next_version(existing.last().copied())?;

        let artifact = build(version)?;
        if artifact.market != market || artifact.version != version {
            return Err(PipelineError::Internal(format!(
                "allocated {} {} but built {} {}",
                market, version, artifact.market, artifact.version
            )));
        }
        self.put_locked(artifact, &existing).await
    }

    async fn put_locked(&self, artifact: ModelArtifact, existing: &[ModelVersion]) -> Result<Arc<ModelArtifact>> {
        let market = artifact.market;
        let version = artifact.version;
        if existing.contains(&version) {
            return Err(PipelineError::DuplicateVersion { market, version });
        }
        if let Some(latest) = existing.last() {
            if version < *latest {
                return Err(PipelineError::VersionRegression {
                    market,
                    latest: *latest,
                    attempted: version,
                });
            }
        }

        self.store.put(&artifact).await?;
        tracing::info!(
            %market,
            %version,
            families = ?artifact.families(),
            test = %artifact.test_metrics,
            "Registered model artifact"
        );
        Ok(Arc::new(artifact))
    }

    /// Point `market`'s serving pointer at a registered version
    pub async fn promote(&self, market: Market, version: ModelVersion) -> Result<Arc<ModelArtifact>> {
        let _guard = self.writer(market)?.lock().await;

        let artifact = self
            .store
            .get(market, version)
            .await?
            .ok_or(PipelineError::ArtifactNotFound { market, version })?;
        let artifact = Arc::new(artifact);

        self.store.set_serving(market, version).await?;
        let previous = self.serving.write().insert(market, Arc::clone(&artifact));

        tracing::info!(
            %market,
            %version,
            previous = ?previous.map(|a| a.version),
            "Promoted model to serving"
        );
        Ok(artifact)
    }

    /// The artifact currently serving for `market`
    pub async fn get_serving(&self, market: Market) -> Result<Arc<ModelArtifact>> {
        let cached = self.serving.read().get(&market).cloned();
        if let Some(artifact) = cached {
            return Ok(artifact);
        }

        // Cold cache: load under the writer lock so a concurrent promote cannot interleave
        let _guard = self.writer(market)?.lock().await;
        let cached = self.serving.read().get(&market).cloned();
        if let Some(artifact) = cached {
            return Ok(artifact);
        }

        let version = self
            .store
            .serving(market)
            .await?
            .ok_or(PipelineError::NoServingModel(market))?;
        let artifact = self.store.get(market, version).await?.ok_or_else(|| {
            PipelineError::CorruptArtifact(format!(
                "{} serving pointer names {} which is not registered",
                market, version
            ))
        })?;

        let artifact = Arc::new(artifact);
        self.serving.write().insert(market, Arc::clone(&artifact));
        Ok(artifact)
    }

    /// Serving artifact decoded for prediction
    pub async fn serving_model(&self, market: Market) -> Result<ServingModel> {
        let artifact = self.get_serving(market).await?;
        ServingModel::from_artifact(&artifact)
    }

    pub async fn serving_version(&self, market: Market) -> Result<Option<ModelVersion>> {
        match self.get_serving(market).await {
            Ok(artifact) => Ok(Some(artifact.version)),
            Err(PipelineError::NoServingModel(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, market: Market, version: ModelVersion) -> Result<ModelArtifact> {
        self.store
            .get(market, version)
            .await?
            .ok_or(PipelineError::ArtifactNotFound { market, version })
    }

    pub async fn versions(&self, market: Market) -> Result<Vec<ModelVersion>> {
        self.store.versions(market).await
    }

    pub async fn latest_version(&self, market: Market) -> Result<Option<ModelVersion>> {
        Ok(self.store.versions(market).await?.last().copied())
    }
}
