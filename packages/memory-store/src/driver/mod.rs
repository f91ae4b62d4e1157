//! Driver abstraction (§4.A): a thin capability contract around a vector
//! backend. The engine never computes embeddings and never speaks a
//! concrete backend's wire protocol directly. Every store talks to a
//! `VectorDriver` obtained from the connection pool.

mod mock;

pub use mock::{MockBackend, MockDriver, MockDriverFactory};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// A payload value as stored alongside a point's vector: a closed tagged
/// union. Callers coerce through the typed accessors below.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Str(String),
    Int(i64),
    Float(f64),
    StrList(Vec<String>),
}

impl PayloadValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PayloadValue::Float(f) => Some(*f),
            PayloadValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            PayloadValue::StrList(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(s: &str) -> Self {
        PayloadValue::Str(s.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(s: String) -> Self {
        PayloadValue::Str(s)
    }
}

impl From<i64> for PayloadValue {
    fn from(i: i64) -> Self {
        PayloadValue::Int(i)
    }
}

impl From<f64> for PayloadValue {
    fn from(f: f64) -> Self {
        PayloadValue::Float(f)
    }
}

impl From<Vec<String>> for PayloadValue {
    fn from(v: Vec<String>) -> Self {
        PayloadValue::StrList(v)
    }
}

pub type Payload = HashMap<String, PayloadValue>;

/// The backend's unit of storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f64>,
    pub payload: Payload,
}

/// A point scored by similarity, as returned from `query`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    /// Higher is more similar, already normalized to the driver's convention.
    pub score: f64,
    pub payload: Payload,
    pub vector: Option<Vec<f64>>,
}

/// A single field condition understood by the filter compiler (§4.E).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    Equals { field: String, value: PayloadValue },
    MatchAny { field: String, values: Vec<PayloadValue> },
    GreaterOrEqual { field: String, value: i64 },
    LessThan { field: String, value: i64 },
}

/// A compiled filter tree: a conjunction of conditions, each of which may
/// itself be a disjunction (`should`), matching the driver's documented
/// capability to express `must`/`should` nesting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<FieldCondition>,
    pub should: Vec<FieldCondition>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionInfo {
    pub point_count: u64,
    pub segment_count: u64,
    pub indexed_count: u64,
}

/// Capabilities required from a vector backend (§4.A). A mock/in-memory
/// implementation satisfying this contract exists in [`mock`] for tests.
#[async_trait]
pub trait VectorDriver: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn create_collection(&self, name: &str, dim: usize, distance: DistanceMetric) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo>;

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    async fn get(
        &self,
        collection: &str,
        ids: &[String],
        with_payload: bool,
        with_vectors: bool,
    ) -> Result<Vec<Point>>;

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        with_payload: bool,
        with_vectors: bool,
    ) -> Result<Vec<Point>>;

    async fn query(
        &self,
        collection: &str,
        vector: &[f64],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<ScoredPoint>>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<u64>;

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64>;
}
