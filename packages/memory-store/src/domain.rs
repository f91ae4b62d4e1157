//! Domain model for the memory engine (RFC-200: vector-indexed chunk store)
//!
//! - `Chunk`: a unit of stored memory (content + embedding + metadata)
//! - `Relationship`: a directed, confidence-weighted edge between two chunks
//! - `SearchQuery` / `SearchResult`: semantic search request/response shapes
//! - `RelationshipQuery` / `GraphTraversalResult`: relationship graph query shapes

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default embedding dimensionality for the primary collection.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Sentinel repository value matching cross-project memory in filters.
pub const GLOBAL_REPOSITORY: &str = "global";

/// A project-scoped repository value, or the cross-project `"global"`
/// sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryTier {
    Project(String),
    Global,
}

impl MemoryTier {
    /// Classify a raw repository string (§4.E/§4.H): empty or the literal
    /// `"global"` sentinel maps to [`MemoryTier::Global`], anything else is
    /// a project scope.
    pub fn from_repository(repository: &str) -> Self {
        if repository.is_empty() || repository == GLOBAL_REPOSITORY {
            MemoryTier::Global
        } else {
            MemoryTier::Project(repository.to_string())
        }
    }

    pub fn as_repository(&self) -> &str {
        match self {
            MemoryTier::Project(repo) => repo,
            MemoryTier::Global => GLOBAL_REPOSITORY,
        }
    }
}

/// Default name of the primary chunk collection.
pub const DEFAULT_CHUNK_COLLECTION: &str = "claude_memory";

/// Default name of the secondary relationship collection.
pub const DEFAULT_RELATIONSHIP_COLLECTION: &str = "memory_relationships";

/// Dummy vector dimension used by the relationship collection (backends that
/// require a vector still work; the value carries no semantic meaning).
pub const RELATIONSHIP_VECTOR_DIMENSION: usize = 1;

// ═══════════════════════════════════════════════════════════════════════════
// Chunk
// ═══════════════════════════════════════════════════════════════════════════

/// The kind of memory a [`Chunk`] captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Problem,
    Solution,
    Discussion,
    ArchitectureDecision,
    Analysis,
    Task,
    TaskUpdate,
    TaskProgress,
    CodeChange,
    Question,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Problem => "problem",
            ChunkType::Solution => "solution",
            ChunkType::Discussion => "discussion",
            ChunkType::ArchitectureDecision => "architecture_decision",
            ChunkType::Analysis => "analysis",
            ChunkType::Task => "task",
            ChunkType::TaskUpdate => "task_update",
            ChunkType::TaskProgress => "task_progress",
            ChunkType::CodeChange => "code_change",
            ChunkType::Question => "question",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "problem" => ChunkType::Problem,
            "solution" => ChunkType::Solution,
            "discussion" => ChunkType::Discussion,
            "architecture_decision" => ChunkType::ArchitectureDecision,
            "analysis" => ChunkType::Analysis,
            "task" => ChunkType::Task,
            "task_update" => ChunkType::TaskUpdate,
            "task_progress" => ChunkType::TaskProgress,
            "code_change" => ChunkType::CodeChange,
            "question" => ChunkType::Question,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome recorded against a chunk's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    InProgress,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::InProgress => "in_progress",
            Outcome::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "success" => Outcome::Success,
            "in_progress" => Outcome::InProgress,
            "failed" => Outcome::Failed,
            _ => return None,
        })
    }
}

/// Subjective difficulty recorded against a chunk's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Simple,
    Moderate,
    Complex,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Simple => "simple",
            Difficulty::Moderate => "moderate",
            Difficulty::Complex => "complex",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "simple" => Difficulty::Simple,
            "moderate" => Difficulty::Moderate,
            "complex" => Difficulty::Complex,
            _ => return None,
        })
    }
}

/// Metadata carried alongside a chunk's text and embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    pub outcome: Option<Outcome>,
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub time_spent: Option<i64>,
    /// Home for fields merged in by the content adapter (`Content::metadata`).
    #[serde(default)]
    pub extended: HashMap<String, String>,
}

/// A unit of stored memory: text plus the vector embedding used for
/// semantic retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub content: String,
    pub summary: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f64>,
}

impl Chunk {
    /// Construct a chunk with a fresh id and the current timestamp.
    pub fn new(
        session_id: impl Into<String>,
        chunk_type: ChunkType,
        content: impl Into<String>,
        summary: impl Into<String>,
        embedding: Vec<f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            chunk_type,
            content: content.into(),
            summary: summary.into(),
            metadata: ChunkMetadata::default(),
            embedding,
        }
    }

    /// `timestamp` truncated to whole seconds, per the round-trip invariant (§8).
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Relationship
// ═══════════════════════════════════════════════════════════════════════════

/// The typed meaning of a directed edge between two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    LedTo,
    SolvedBy,
    DependsOn,
    Enables,
    FollowsUp,
    Precedes,
    References,
    Contradicts,
    Duplicates,
    RelatedTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::LedTo => "led_to",
            RelationType::SolvedBy => "solved_by",
            RelationType::DependsOn => "depends_on",
            RelationType::Enables => "enables",
            RelationType::FollowsUp => "follows_up",
            RelationType::Precedes => "precedes",
            RelationType::References => "references",
            RelationType::Contradicts => "contradicts",
            RelationType::Duplicates => "duplicates",
            RelationType::RelatedTo => "related_to",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "led_to" => RelationType::LedTo,
            "solved_by" => RelationType::SolvedBy,
            "depends_on" => RelationType::DependsOn,
            "enables" => RelationType::Enables,
            "follows_up" => RelationType::FollowsUp,
            "precedes" => RelationType::Precedes,
            "references" => RelationType::References,
            "contradicts" => RelationType::Contradicts,
            "duplicates" => RelationType::Duplicates,
            "related_to" => RelationType::RelatedTo,
            _ => return None,
        })
    }

    /// Whether storing `(A -> B, t)` must also imply `(B -> A, t)` (§3, §4.D).
    pub fn is_symmetric(&self) -> bool {
        matches!(self, RelationType::Contradicts | RelationType::Duplicates | RelationType::RelatedTo)
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a relationship's confidence value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    User,
    Inferred,
    Derived,
}

impl ConfidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceSource::User => "user",
            ConfidenceSource::Inferred => "inferred",
            ConfidenceSource::Derived => "derived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "user" => ConfidenceSource::User,
            "inferred" => ConfidenceSource::Inferred,
            "derived" => ConfidenceSource::Derived,
            _ => return None,
        })
    }
}

/// Named per-source contributions to a relationship's confidence (§3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub user_certainty: Option<f64>,
    pub consistency_score: Option<f64>,
    pub corroboration_count: Option<i64>,
}

/// A directed, typed, confidence-weighted edge between two chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_chunk_id: String,
    pub target_chunk_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub confidence_source: ConfidenceSource,
    #[serde(default)]
    pub confidence_factors: ConfidenceFactors,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validation_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Relationship {
    pub fn new(
        source_chunk_id: impl Into<String>,
        target_chunk_id: impl Into<String>,
        relation_type: RelationType,
        confidence: f64,
        confidence_source: ConfidenceSource,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_chunk_id: source_chunk_id.into(),
            target_chunk_id: target_chunk_id.into(),
            relation_type,
            confidence: confidence.clamp(0.0, 1.0),
            confidence_source,
            confidence_factors: ConfidenceFactors::default(),
            created_at: Utc::now(),
            created_by: created_by.into(),
            last_validated: None,
            validation_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// A relationship with source and target swapped, same id-less identity,
    /// used for the symmetric write in `store_relationship` (§4.D).
    pub fn reversed(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_chunk_id: self.target_chunk_id.clone(),
            target_chunk_id: self.source_chunk_id.clone(),
            relation_type: self.relation_type,
            confidence: self.confidence,
            confidence_source: self.confidence_source,
            confidence_factors: self.confidence_factors.clone(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
            last_validated: self.last_validated,
            validation_count: self.validation_count,
            metadata: self.metadata.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Search
// ═══════════════════════════════════════════════════════════════════════════

/// Relative time window applied to `timestamp` (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recency {
    Recent,
    LastMonth,
    AllTime,
}

/// A semantic search request over the chunk collection.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query_text: String,
    pub repository: Option<String>,
    pub types: Vec<ChunkType>,
    pub recency: Recency,
    pub limit: usize,
    pub min_relevance_score: f64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query_text: String::new(),
            repository: None,
            types: Vec::new(),
            recency: Recency::AllTime,
            limit: 10,
            min_relevance_score: 0.0,
        }
    }
}

/// A chunk returned from `search`, scored by cosine similarity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// Relationship queries and graph traversal
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Confidence,
    CreatedAt,
    ValidationCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct RelationshipQuery {
    pub chunk_id: String,
    pub direction: Direction,
    pub relation_types: Vec<RelationType>,
    pub min_confidence: f64,
    pub limit: u32,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl RelationshipQuery {
    pub fn new(chunk_id: impl Into<String>, direction: Direction) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            direction,
            relation_types: Vec::new(),
            min_confidence: 0.0,
            limit: 100,
            sort_by: SortBy::Confidence,
            sort_order: SortOrder::Desc,
        }
    }
}

/// One DFS path discovered by `traverse_graph` (§4.D).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub chunk_ids: Vec<String>,
    pub path_score: f64,
    pub depth: usize,
    pub path_type: String,
}

/// A visited node's aggregate connectivity within one traversal call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub chunk_id: String,
    pub degree: usize,
    pub centrality: f64,
}

/// A discovered relationship edge, with the traversal-assigned weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub relationship: Relationship,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphTraversalResult {
    pub paths: Vec<GraphPath>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Batch results
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Stats
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStoreStats {
    pub total_chunks: u64,
    pub estimated_storage_bytes: u64,
    pub chunks_by_type: HashMap<String, u64>,
    pub chunks_by_repo: HashMap<String, u64>,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
    pub average_embedding_length: f64,
}
