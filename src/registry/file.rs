//! Directory-backed artifact store
//!
//! Layout under the root:
//! ```text
//! <market>/SERVING.json
//! <market>/v1.2.0/metadata.json
//! <market>/v1.2.0/models/<family>.json
//! ```
//! Versions are written to a hidden temporary directory and renamed into
//! place, and the serving pointer is replaced by renaming a temporary file,
//! so readers never observe a partial artifact or pointer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::artifact::{ArtifactMetadata, ModelArtifact};
use super::store::ArtifactStore;
use crate::error::{PipelineError, Result};
use crate::ml::ModelPayload;
use crate::types::{Market, ModelVersion};

const METADATA_FILE: &str = "metadata.json";
const MODELS_DIR: &str = "models";
const SERVING_FILE: &str = "SERVING.json";

#[derive(Debug, Serialize, Deserialize)]
struct ServingPointer {
    version: ModelVersion,
    promoted_at: DateTime<Utc>,
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `path`; `~` is expanded
    pub async fn open(path: &str) -> Result<Self> {
        let root = PathBuf::from(shellexpand::tilde(path).into_owned());
        fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Opened file artifact store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn market_dir(&self, market: Market) -> PathBuf {
        self.root.join(market.as_str())
    }

    fn version_dir(&self, market: Market, version: ModelVersion) -> PathBuf {
        self.market_dir(market).join(version.to_string())
    }
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn put(&self, artifact: &ModelArtifact) -> Result<()> {
        let target = self.version_dir(artifact.market, artifact.version);
        if fs::try_exists(&target).await? {
            return Err(PipelineError::DuplicateVersion {
                market: artifact.market,
                version: artifact.version,
            });
        }

        let staging = self
            .market_dir(artifact.market)
            .join(format!(".{}.{}.tmp", artifact.version, artifact.id));

        let published = match write_staging(&staging, artifact).await {
            Ok(()) => fs::rename(&staging, &target).await.map_err(PipelineError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                tracing::warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, market: Market, version: ModelVersion) -> Result<Option<ModelArtifact>> {
        let dir = self.version_dir(market, version);
        if !fs::try_exists(dir.join(METADATA_FILE)).await? {
            return Ok(None);
        }

        let raw = fs::read(dir.join(METADATA_FILE)).await?;
        let metadata: ArtifactMetadata = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::CorruptArtifact(format!("{} {} metadata: {}", market, version, e)))?;

        let mut payloads = Vec::with_capacity(metadata.payloads.len());
        for descriptor in &metadata.payloads {
            let file = dir.join(MODELS_DIR).join(format!("{}.json", descriptor.family));
            let bytes = fs::read(&file).await.map_err(|e| {
                PipelineError::CorruptArtifact(format!("{}: {}", file.display(), e))
            })?;
            payloads.push(ModelPayload {
                family: descriptor.family,
                schema: descriptor.schema.clone(),
                checksum: descriptor.checksum.clone(),
                bytes,
            });
        }

        ModelArtifact::from_parts(metadata, payloads).map(Some)
    }

    async fn versions(&self, market: Market) -> Result<Vec<ModelVersion>> {
        let dir = self.market_dir(market);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Staging directories start with '.'
            let Ok(version) = name.parse::<ModelVersion>() else { continue };
            if fs::try_exists(entry.path().join(METADATA_FILE)).await? {
                versions.push(version);
            }
        }

        versions.sort();
        Ok(versions)
    }

    async fn set_serving(&self, market: Market, version: ModelVersion) -> Result<()> {
        let dir = self.market_dir(market);
        fs::create_dir_all(&dir).await?;

        let pointer = ServingPointer {
            version,
            promoted_at: Utc::now(),
        };
        let staging = dir.join(format!(".{}.tmp", SERVING_FILE));
        fs::write(&staging, serde_json::to_vec_pretty(&pointer)?).await?;
        fs::rename(&staging, dir.join(SERVING_FILE)).await?;
        Ok(())
    }

    async fn serving(&self, market: Market) -> Result<Option<ModelVersion>> {
        let file = self.market_dir(market).join(SERVING_FILE);
        if !fs::try_exists(&file).await? {
            return Ok(None);
        }

        let raw = fs::read(&file).await?;
        let pointer: ServingPointer = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::CorruptArtifact(format!("{} serving pointer: {}", market, e)))?;
        Ok(Some(pointer.version))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Metadata plus one file per payload, written under `staging`
async fn write_staging(staging: &Path, artifact: &ModelArtifact) -> Result<()> {
    fs::create_dir_all(staging.join(MODELS_DIR)).await?;

    let (metadata, payloads) = artifact.clone().into_parts();
    fs::write(staging.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?).await?;
    for payload in &payloads {
        let file = staging.join(MODELS_DIR).join(format!("{}.json", payload.family));
        fs::write(file, &payload.bytes).await?;
    }
    Ok(())
}
