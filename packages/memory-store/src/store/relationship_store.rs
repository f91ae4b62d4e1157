//! Relationship store (§4.D): CRUD and query of [`Relationship`] records in
//! the secondary collection, plus graph traversal with confidence
//! aggregation and degree centrality.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use petgraph::graph::{DiGraph, NodeIndex};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::domain::{
    ConfidenceFactors, Direction, GraphEdge, GraphNode, GraphPath, GraphTraversalResult, RelationType, Relationship,
    RelationshipQuery, SortBy, SortOrder, DEFAULT_RELATIONSHIP_COLLECTION, RELATIONSHIP_VECTOR_DIMENSION,
};
use crate::driver::{DistanceMetric, FieldCondition, Filter, VectorDriver};
use crate::error::{MemoryError, Result};
use crate::pool::{ConnectionPool, PoolableConnection};

use super::codec::{point_to_relationship, relationship_to_point};

/// Default traversal depth when the caller passes `max_depth <= 0` (§4.D).
pub const DEFAULT_MAX_DEPTH: u32 = 3;
const SCROLL_CAP: usize = 10_000;

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()>;
    async fn store(&self, relationship: &Relationship, cancel: &CancellationToken) -> Result<()>;
    async fn store_relationship(
        &self,
        source: &str,
        target: &str,
        relation_type: RelationType,
        confidence: f64,
        created_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Relationship>;
    async fn get_relationships(&self, query: &RelationshipQuery, cancel: &CancellationToken) -> Result<Vec<Relationship>>;
    async fn traverse_graph(
        &self,
        start: &str,
        max_depth: i64,
        relation_types: &[RelationType],
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult>;
    async fn update_relationship(
        &self,
        id: &str,
        confidence: Option<f64>,
        factors: Option<ConfidenceFactors>,
        cancel: &CancellationToken,
    ) -> Result<Relationship>;
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()>;
}

fn validate_relationship(rel: &Relationship) -> Result<()> {
    if rel.source_chunk_id.is_empty() || rel.target_chunk_id.is_empty() {
        return Err(MemoryError::validation("relationship endpoints must not be empty"));
    }
    if rel.source_chunk_id == rel.target_chunk_id {
        return Err(MemoryError::validation("relationship source and target must differ"));
    }
    if !(0.0..=1.0).contains(&rel.confidence) {
        return Err(MemoryError::validation("relationship confidence must be in [0, 1]"));
    }
    Ok(())
}

pub struct DriverRelationshipStore<C: PoolableConnection + Clone + VectorDriver> {
    pool: ConnectionPool<C>,
    collection: String,
}

impl<C: PoolableConnection + Clone + VectorDriver> DriverRelationshipStore<C> {
    pub fn new(pool: ConnectionPool<C>) -> Self {
        Self { pool, collection: DEFAULT_RELATIONSHIP_COLLECTION.to_string() }
    }

    pub fn with_collection(pool: ConnectionPool<C>, collection: impl Into<String>) -> Self {
        Self { pool, collection: collection.into() }
    }

    async fn driver(&self, cancel: &CancellationToken) -> Result<crate::pool::PooledConnection<C>> {
        self.pool.get(cancel).await
    }

    async fn fetch_by_id(&self, id: &str, cancel: &CancellationToken) -> Result<Relationship> {
        let conn = self.driver(cancel).await?;
        let mut points = conn.conn().get(&self.collection, &[id.to_string()], true, false).await?;
        let point = points.pop().ok_or_else(|| MemoryError::not_found(id))?;
        point_to_relationship(point)
    }
}

#[async_trait]
impl<C: PoolableConnection + Clone + VectorDriver> RelationshipStore for DriverRelationshipStore<C> {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let conn = self.driver(cancel).await?;
        conn.conn().create_collection(&self.collection, RELATIONSHIP_VECTOR_DIMENSION, DistanceMetric::Cosine).await
    }

    #[instrument(skip_all, fields(source = %relationship.source_chunk_id, target = %relationship.target_chunk_id))]
    async fn store(&self, relationship: &Relationship, cancel: &CancellationToken) -> Result<()> {
        validate_relationship(relationship)?;
        let point = relationship_to_point(relationship);
        let conn = self.driver(cancel).await?;
        conn.conn().upsert(&self.collection, vec![point]).await
    }

    #[instrument(skip_all, fields(source = %source, target = %target, relation_type = %relation_type))]
    async fn store_relationship(
        &self,
        source: &str,
        target: &str,
        relation_type: RelationType,
        confidence: f64,
        created_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Relationship> {
        let relationship = Relationship::new(source, target, relation_type, confidence, crate::domain::ConfidenceSource::User, created_by);
        self.store(&relationship, cancel).await?;
        if relation_type.is_symmetric() {
            let reverse = relationship.reversed();
            self.store(&reverse, cancel).await?;
        }
        Ok(relationship)
    }

    #[instrument(skip_all, fields(chunk_id = %query.chunk_id, direction = ?query.direction))]
    async fn get_relationships(&self, query: &RelationshipQuery, cancel: &CancellationToken) -> Result<Vec<Relationship>> {
        let filter = match query.direction {
            Direction::Outgoing => Filter {
                must: vec![FieldCondition::Equals { field: "source_chunk_id".into(), value: query.chunk_id.clone().into() }],
                should: vec![],
            },
            Direction::Incoming => Filter {
                must: vec![FieldCondition::Equals { field: "target_chunk_id".into(), value: query.chunk_id.clone().into() }],
                should: vec![],
            },
            Direction::Both => Filter {
                must: vec![],
                should: vec![
                    FieldCondition::Equals { field: "source_chunk_id".into(), value: query.chunk_id.clone().into() },
                    FieldCondition::Equals { field: "target_chunk_id".into(), value: query.chunk_id.clone().into() },
                ],
            },
        };

        let conn = self.driver(cancel).await?;
        let points = conn.conn().scroll(&self.collection, Some(&filter), SCROLL_CAP, true, false).await?;
        let mut relationships: Vec<Relationship> = points.into_iter().map(point_to_relationship).collect::<Result<_>>()?;

        relationships.retain(|r| r.confidence >= query.min_confidence);
        if !query.relation_types.is_empty() {
            relationships.retain(|r| query.relation_types.contains(&r.relation_type));
        }

        relationships.sort_by(|a, b| {
            let ordering = match query.sort_by {
                SortBy::Confidence => a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal),
                SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
                SortBy::ValidationCount => a.validation_count.cmp(&b.validation_count),
            };
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        relationships.truncate(query.limit as usize);
        Ok(relationships)
    }

    #[instrument(skip_all, fields(start = %start, max_depth))]
    async fn traverse_graph(
        &self,
        start: &str,
        max_depth: i64,
        relation_types: &[RelationType],
        cancel: &CancellationToken,
    ) -> Result<GraphTraversalResult> {
        let max_depth = if max_depth <= 0 { DEFAULT_MAX_DEPTH } else { max_depth as u32 };

        // Pull the whole relationship collection once; traversal treats it
        // as undirected but still records each edge's original direction.
        let conn = self.driver(cancel).await?;
        let all_points = conn.conn().scroll(&self.collection, None, SCROLL_CAP, true, false).await?;
        drop(conn);
        let mut relationships: Vec<Relationship> = all_points.into_iter().map(point_to_relationship).collect::<Result<_>>()?;
        if !relation_types.is_empty() {
            relationships.retain(|r| relation_types.contains(&r.relation_type));
        }

        let mut graph: DiGraph<String, Relationship> = DiGraph::new();
        let mut node_index: HashMap<String, NodeIndex> = HashMap::new();
        let mut ensure_node = |graph: &mut DiGraph<String, Relationship>, id: &str| -> NodeIndex {
            *node_index.entry(id.to_string()).or_insert_with(|| graph.add_node(id.to_string()))
        };
        for rel in &relationships {
            let a = ensure_node(&mut graph, &rel.source_chunk_id);
            let b = ensure_node(&mut graph, &rel.target_chunk_id);
            graph.add_edge(a, b, rel.clone());
        }

        let Some(&start_idx) = node_index.get(start) else {
            return Ok(GraphTraversalResult::default());
        };

        // Undirected adjacency: for each node, every edge touching it regardless
        // of its recorded direction (§4.D: "treating the graph as undirected
        // for traversal but recording direction on edges").
        let mut adjacency: HashMap<NodeIndex, Vec<(NodeIndex, petgraph::graph::EdgeIndex)>> = HashMap::new();
        for edge in graph.edge_indices() {
            let (a, b) = graph.edge_endpoints(edge).unwrap();
            adjacency.entry(a).or_default().push((b, edge));
            adjacency.entry(b).or_default().push((a, edge));
        }

        let mut paths = Vec::new();
        let mut edges_seen: HashSet<petgraph::graph::EdgeIndex> = HashSet::new();
        let mut degree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut visited_nodes: HashSet<NodeIndex> = HashSet::new();
        visited_nodes.insert(start_idx);

        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, Vec<Relationship>, f64)> =
            vec![(start_idx, vec![start_idx], vec![], 0.0)];

        while let Some((current, path, rels_on_path, confidence_sum)) = stack.pop() {
            let Some(neighbors) = adjacency.get(&current) else { continue };
            for &(next, edge) in neighbors {
                if visited_nodes.contains(&next) || path.len() as u32 > max_depth {
                    continue;
                }
                let rel = graph.edge_weight(edge).unwrap().clone();
                edges_seen.insert(edge);
                *degree.entry(current).or_insert(0) += 1;
                *degree.entry(next).or_insert(0) += 1;

                let mut new_path = path.clone();
                new_path.push(next);
                let mut new_rels = rels_on_path.clone();
                new_rels.push(rel.clone());
                let new_sum = confidence_sum + rel.confidence;
                let path_score = new_sum / new_rels.len() as f64;

                let chunk_ids: Vec<String> = new_path.iter().map(|&idx| graph[idx].clone()).collect();
                paths.push(GraphPath {
                    chunk_ids,
                    path_score,
                    depth: new_rels.len(),
                    path_type: classify_path(&new_rels),
                });

                visited_nodes.insert(next);
                if (new_path.len() as u32) <= max_depth {
                    stack.push((next, new_path, new_rels, new_sum));
                }
            }
        }

        let total_degree: usize = degree.values().sum();
        let nodes = visited_nodes
            .iter()
            .map(|&idx| {
                let d = *degree.get(&idx).unwrap_or(&0);
                GraphNode {
                    chunk_id: graph[idx].clone(),
                    degree: d,
                    centrality: if total_degree == 0 { 0.0 } else { d as f64 / total_degree as f64 },
                }
            })
            .collect();

        let edges = edges_seen
            .into_iter()
            .map(|e| {
                let rel = graph.edge_weight(e).unwrap().clone();
                GraphEdge { weight: rel.confidence, relationship: rel }
            })
            .collect();

        Ok(GraphTraversalResult { paths, nodes, edges })
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn update_relationship(
        &self,
        id: &str,
        confidence: Option<f64>,
        factors: Option<ConfidenceFactors>,
        cancel: &CancellationToken,
    ) -> Result<Relationship> {
        let mut rel = self.fetch_by_id(id, cancel).await?;
        if let Some(c) = confidence {
            rel.confidence = c.clamp(0.0, 1.0);
        }
        if let Some(f) = factors {
            rel.confidence_factors = f;
            rel.validation_count += 1;
            rel.last_validated = Some(Utc::now());
        }
        self.store(&rel, cancel).await?;
        Ok(rel)
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let conn = self.driver(cancel).await?;
        conn.conn().delete(&self.collection, &[id.to_string()]).await
    }
}

/// Classifies a discovered path by the relation types it crosses (§4.D).
fn classify_path(rels: &[Relationship]) -> String {
    let len = rels.len();
    let has = |types: &[RelationType]| rels.iter().any(|r| types.contains(&r.relation_type));

    if has(&[RelationType::LedTo, RelationType::SolvedBy]) {
        if len >= 3 { "complex_problem_to_solution" } else { "problem_to_solution" }.to_string()
    } else if has(&[RelationType::DependsOn, RelationType::Enables]) {
        if len >= 4 { "deep_dependency_chain" } else { "dependency_chain" }.to_string()
    } else if has(&[RelationType::FollowsUp, RelationType::Precedes]) {
        if len >= 5 { "long_temporal_sequence" } else { "temporal_sequence" }.to_string()
    } else if len >= 4 {
        "complex_general".to_string()
    } else {
        "general".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockBackend, MockDriver, MockDriverFactory};
    use crate::pool::{ConnectionPool, PoolConfig};
    use std::sync::Arc;

    fn make_store() -> DriverRelationshipStore<MockDriver> {
        let backend = MockBackend::new();
        let factory = Arc::new(MockDriverFactory::new(backend));
        let pool = ConnectionPool::new(PoolConfig { max_size: 2, min_size: 0, ..Default::default() }, factory);
        DriverRelationshipStore::new(pool)
    }

    #[tokio::test]
    async fn store_relationship_for_symmetric_type_writes_both_directions() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        store.store_relationship("a", "b", RelationType::RelatedTo, 0.6, "tester", &cancel).await.unwrap();

        let outgoing = store
            .get_relationships(&RelationshipQuery::new("a", Direction::Outgoing), &cancel)
            .await
            .unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].target_chunk_id, "b");

        let incoming = store
            .get_relationships(&RelationshipQuery::new("a", Direction::Incoming), &cancel)
            .await
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_chunk_id, "b");
        assert_eq!(incoming[0].confidence, 0.6);
    }

    #[tokio::test]
    async fn store_relationship_for_asymmetric_type_writes_one_direction() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        store.store_relationship("a", "b", RelationType::LedTo, 0.8, "tester", &cancel).await.unwrap();

        let from_b = store
            .get_relationships(&RelationshipQuery::new("b", Direction::Outgoing), &cancel)
            .await
            .unwrap();
        assert!(from_b.is_empty());
    }

    #[tokio::test]
    async fn traverse_graph_over_a_chain_reports_nodes_edges_and_path_type() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        store.store_relationship("a", "b", RelationType::LedTo, 0.9, "t", &cancel).await.unwrap();
        store.store_relationship("b", "c", RelationType::SolvedBy, 0.8, "t", &cancel).await.unwrap();
        store.store_relationship("c", "d", RelationType::DependsOn, 0.7, "t", &cancel).await.unwrap();

        let result = store.traverse_graph("a", 3, &[], &cancel).await.unwrap();
        assert_eq!(result.nodes.len(), 4);
        assert_eq!(result.edges.len(), 3);
        let longest = result.paths.iter().max_by_key(|p| p.depth).unwrap();
        assert_eq!(longest.chunk_ids, vec!["a", "b", "c", "d"]);
        assert!(longest.path_type == "complex_problem_to_solution" || longest.path_type == "problem_to_solution");
    }

    #[tokio::test]
    async fn traverse_graph_defaults_max_depth_when_non_positive() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        store.store_relationship("a", "b", RelationType::LedTo, 0.5, "t", &cancel).await.unwrap();
        let result = store.traverse_graph("a", 0, &[], &cancel).await.unwrap();
        assert!(!result.paths.is_empty());
    }

    #[tokio::test]
    async fn update_relationship_increments_validation_count() {
        let store = make_store();
        let cancel = CancellationToken::new();
        store.initialize(&cancel).await.unwrap();
        let rel = store.store_relationship("a", "b", RelationType::LedTo, 0.5, "t", &cancel).await.unwrap();
        let updated = store
            .update_relationship(&rel.id, Some(0.9), Some(ConfidenceFactors { user_certainty: Some(0.9), ..Default::default() }), &cancel)
            .await
            .unwrap();
        assert_eq!(updated.confidence, 0.9);
        assert_eq!(updated.validation_count, 1);
        assert!(updated.last_validated.is_some());
    }
}
