//! Durable artifact storage

use async_trait::async_trait;

use super::artifact::ModelArtifact;
use crate::error::Result;
use crate::types::{Market, ModelVersion};

/// Persistence backend for the registry.
///
/// Stores are dumb: ordering rules and single-writer discipline live in
/// [`ModelRegistry`](super::ModelRegistry). `put` must never overwrite an
/// existing (market, version) and `set_serving` must replace the pointer
/// atomically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, artifact: &ModelArtifact) -> Result<()>;

    async fn get(&self, market: Market, version: ModelVersion) -> Result<Option<ModelArtifact>>;

    /// Registered versions for `market`, ascending
    async fn versions(&self, market: Market) -> Result<Vec<ModelVersion>>;

    async fn set_serving(&self, market: Market, version: ModelVersion) -> Result<()>;

    async fn serving(&self, market: Market) -> Result<Option<ModelVersion>>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
