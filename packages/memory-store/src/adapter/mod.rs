//! Content adapter (§4.H): a bidirectional mapping layer between an
//! external "Content" domain model and the internal [`Chunk`] model, for
//! callers migrating off a legacy higher-level API.
//!
//! Exclusively a mapping layer. Every operation either translates through
//! to the wrapped [`ChunkStore`] or is refused with `not_implemented` (§9
//! "Adapter placeholders"). It never invents storage behavior of its own.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::{Chunk, ChunkMetadata, ChunkType};
use crate::error::{MemoryError, Result};
use crate::store::ChunkStore;

/// The higher-level content kind a legacy caller speaks, mapped onto
/// [`ChunkType`] (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Memory,
    Task,
    Decision,
    Insight,
    Problem,
    Solution,
    Code,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Memory => "memory",
            ContentType::Task => "task",
            ContentType::Decision => "decision",
            ContentType::Insight => "insight",
            ContentType::Problem => "problem",
            ContentType::Solution => "solution",
            ContentType::Code => "code",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "memory" => ContentType::Memory,
            "task" => ContentType::Task,
            "decision" => ContentType::Decision,
            "insight" => ContentType::Insight,
            "problem" => ContentType::Problem,
            "solution" => ContentType::Solution,
            "code" => ContentType::Code,
            _ => return None,
        })
    }

    /// Content -> Chunk type map (§4.H). Unknown content types fall back to
    /// `discussion`, matching the engine's documented default.
    fn to_chunk_type(self) -> ChunkType {
        match self {
            ContentType::Memory => ChunkType::Discussion,
            ContentType::Task => ChunkType::Task,
            ContentType::Decision => ChunkType::ArchitectureDecision,
            ContentType::Insight => ChunkType::Analysis,
            ContentType::Problem => ChunkType::Problem,
            ContentType::Solution => ChunkType::Solution,
            ContentType::Code => ChunkType::CodeChange,
        }
    }

    /// Chunk -> Content type map, collapsing `task_update`/`task_progress`
    /// into `task` (§4.H "Inverse mapping").
    fn from_chunk_type(chunk_type: ChunkType) -> Self {
        match chunk_type {
            ChunkType::Task | ChunkType::TaskUpdate | ChunkType::TaskProgress => ContentType::Task,
            ChunkType::ArchitectureDecision => ContentType::Decision,
            ChunkType::Analysis => ContentType::Insight,
            ChunkType::Problem => ContentType::Problem,
            ChunkType::Solution => ContentType::Solution,
            ChunkType::CodeChange => ContentType::Code,
            ChunkType::Discussion | ChunkType::Question => ContentType::Memory,
        }
    }
}

/// The legacy, higher-level content record a migrating caller speaks in
/// (§4.H).
#[derive(Debug, Clone)]
pub struct Content {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub embeddings: Vec<f64>,
    pub metadata: HashMap<String, String>,
}

fn content_to_chunk(content: &Content) -> Chunk {
    Chunk {
        id: content.id.clone(),
        session_id: content.session_id.clone(),
        timestamp: content.created_at,
        chunk_type: content.content_type.to_chunk_type(),
        content: content.content.clone(),
        summary: content.summary.clone(),
        metadata: ChunkMetadata {
            repository: content.project_id.clone(),
            tags: content.tags.iter().cloned().collect(),
            extended: content.metadata.clone(),
            ..Default::default()
        },
        embedding: content.embeddings.clone(),
    }
}

fn chunk_to_content(chunk: Chunk) -> Content {
    Content {
        id: chunk.id,
        project_id: chunk.metadata.repository,
        session_id: chunk.session_id,
        content_type: ContentType::from_chunk_type(chunk.chunk_type),
        created_at: chunk.timestamp,
        content: chunk.content,
        summary: chunk.summary,
        tags: chunk.metadata.tags.into_iter().collect(),
        embeddings: chunk.embedding,
        metadata: chunk.metadata.extended,
    }
}

/// Adapts a [`ChunkStore`] to serve callers that speak the `Content` domain
/// model (§4.H). Holds no storage state of its own.
pub struct ContentAdapter<S: ChunkStore> {
    inner: S,
}

impl<S: ChunkStore> ContentAdapter<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub async fn store_content(&self, content: &Content, cancel: &CancellationToken) -> Result<()> {
        let chunk = content_to_chunk(content);
        self.inner.store(&chunk, cancel).await
    }

    pub async fn get_content(&self, id: &str, cancel: &CancellationToken) -> Result<Content> {
        let chunk = self.inner.get_by_id(id, cancel).await?;
        Ok(chunk_to_content(chunk))
    }

    pub async fn update_content(&self, content: &Content, cancel: &CancellationToken) -> Result<()> {
        let chunk = content_to_chunk(content);
        self.inner.update(&chunk, cancel).await
    }

    pub async fn delete_content(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.inner.delete(id, cancel).await
    }

    pub async fn list_content_by_project(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Content>> {
        let chunks = self.inner.list_by_repository(project_id, limit, offset, cancel).await?;
        Ok(chunks.into_iter().map(chunk_to_content).collect())
    }

    /// Delegates to `list_by_repository` (§9 open question).
    pub async fn find_similar(
        &self,
        project_id: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Content>> {
        self.list_content_by_project(project_id, limit, 0, cancel).await
    }

    // The following are deliberate stubs (§9 "Adapter placeholders"): the
    // engine defines no contract for them, so they are refused rather than
    // silently returning an empty success.

    pub async fn find_patterns(&self, _project_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("find_patterns".into()))
    }

    pub async fn extract_insights(&self, _project_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("extract_insights".into()))
    }

    pub async fn detect_conflicts(&self, _project_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("detect_conflicts".into()))
    }

    pub async fn assess_quality(&self, _content_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("assess_quality".into()))
    }

    pub async fn list_sessions(&self, _project_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("list_sessions".into()))
    }

    pub async fn export_data(&self, _project_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("export_data".into()))
    }

    pub async fn import_data(&self, _payload: &[u8]) -> Result<()> {
        Err(MemoryError::NotImplemented("import_data".into()))
    }

    pub async fn verify_integrity(&self, _project_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("verify_integrity".into()))
    }

    pub async fn get_content_relationships(&self, _content_id: &str) -> Result<()> {
        Err(MemoryError::NotImplemented("get_content_relationships".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockBackend, MockDriver, MockDriverFactory};
    use crate::pool::{ConnectionPool, PoolConfig};
    use crate::store::chunk_store::DriverChunkStore;
    use std::sync::Arc;

    fn make_adapter() -> ContentAdapter<DriverChunkStore<MockDriver>> {
        let backend = MockBackend::new();
        let factory = Arc::new(MockDriverFactory::new(backend));
        let pool = ConnectionPool::new(PoolConfig { max_size: 2, min_size: 0, ..Default::default() }, factory);
        ContentAdapter::new(DriverChunkStore::new(pool, 2))
    }

    fn sample_content() -> Content {
        Content {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: "alpha".into(),
            session_id: "sess-1".into(),
            content_type: ContentType::Decision,
            created_at: Utc::now(),
            content: "use postgres".into(),
            summary: "db choice".into(),
            tags: vec!["infra".into()],
            embeddings: vec![0.1, 0.2],
            metadata: HashMap::from([("author".to_string(), "alice".to_string())]),
        }
    }

    #[tokio::test]
    async fn store_then_get_roundtrips_through_the_chunk_model() {
        let adapter = make_adapter();
        let cancel = CancellationToken::new();
        adapter.inner.initialize(&cancel).await.unwrap();

        let content = sample_content();
        adapter.store_content(&content, &cancel).await.unwrap();
        let got = adapter.get_content(&content.id, &cancel).await.unwrap();

        assert_eq!(got.project_id, "alpha");
        assert_eq!(got.content_type.as_str(), "decision");
        assert_eq!(got.metadata.get("author"), Some(&"alice".to_string()));
    }

    #[tokio::test]
    async fn unknown_content_type_maps_to_discussion_then_back_to_memory() {
        assert_eq!(ContentType::from_chunk_type(ChunkType::Discussion).as_str(), "memory");
        assert_eq!(ContentType::from_chunk_type(ChunkType::TaskUpdate).as_str(), "task");
        assert_eq!(ContentType::from_chunk_type(ChunkType::TaskProgress).as_str(), "task");
    }

    #[tokio::test]
    async fn placeholder_operations_are_refused_not_silently_successful() {
        let adapter = make_adapter();
        let err = adapter.find_patterns("alpha").await.unwrap_err();
        assert!(matches!(err, MemoryError::NotImplemented(_)));
    }
}
