//! End-to-end integration test of the full decorated stack
//! (`Metrics -> CircuitBreaker -> Retry -> DriverChunkStore -> Pool -> MockDriver`)
//! against a relationship graph built on top of the same chunks, with chunk
//! payloads round-tripped through a temp-file-backed JSON snapshot to stand
//! in for an external backup/restore boundary.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use memory_store::domain::{Chunk, ChunkType, Direction, Recency, RelationType, RelationshipQuery, SearchQuery};
use memory_store::driver::{MockBackend, MockDriver, MockDriverFactory};
use memory_store::pool::{ConnectionPool, PoolConfig};
use memory_store::resilience::{
    CircuitBreakerChunkStore, CircuitBreakerConfig, CircuitBreakerRelationshipStore, RetryChunkStore, RetryConfig,
    RetryRelationshipStore,
};
use memory_store::store::chunk_store::DriverChunkStore;
use memory_store::store::relationship_store::DriverRelationshipStore;
use memory_store::store::{ChunkStore, RelationshipStore};

const DIMENSION: usize = 4;

fn build_chunk_stack() -> CircuitBreakerChunkStore<RetryChunkStore<DriverChunkStore<MockDriver>>> {
    let backend = MockBackend::new();
    let factory = Arc::new(MockDriverFactory::new(backend));
    let pool = ConnectionPool::new(PoolConfig { max_size: 4, min_size: 1, ..Default::default() }, factory);
    let store = DriverChunkStore::new(pool, DIMENSION);
    let store = RetryChunkStore::new(store, RetryConfig::default());
    CircuitBreakerChunkStore::new(store, CircuitBreakerConfig::default())
}

fn build_relationship_stack(
    pool: ConnectionPool<MockDriver>,
) -> CircuitBreakerRelationshipStore<RetryRelationshipStore<DriverRelationshipStore<MockDriver>>> {
    let store = DriverRelationshipStore::new(pool);
    let store = RetryRelationshipStore::new(store, RetryConfig::default());
    CircuitBreakerRelationshipStore::new(store, CircuitBreakerConfig::default())
}

fn sample_chunk(session_id: &str, chunk_type: ChunkType, content: &str) -> Chunk {
    let mut chunk = Chunk::new(session_id, chunk_type, content, "summary", vec![0.1, 0.2, 0.3, 0.4]);
    chunk.metadata.repository = "widget-service".into();
    chunk
}

#[tokio::test]
async fn chunk_snapshot_roundtrips_through_a_temp_file_and_restores_into_the_full_stack() {
    let cancel = CancellationToken::new();
    let store = build_chunk_stack();
    store.initialize(&cancel).await.unwrap();

    let originals = vec![
        sample_chunk("chunk-a", ChunkType::Problem, "the cache stampedes under load"),
        sample_chunk("chunk-b", ChunkType::Solution, "added a request-coalescing lock"),
        sample_chunk("chunk-c", ChunkType::Analysis, "latency p99 dropped by 40%"),
    ];
    for chunk in &originals {
        store.store(chunk, &cancel).await.unwrap();
    }

    // Snapshot every chunk for this repository out to a temp directory, one
    // JSON file per chunk, simulating an external backup step that the
    // content adapter's `export_data` stub deliberately declines to take on.
    let dir = TempDir::new().unwrap();
    let listed = store.list_by_repository("widget-service", 10, 0, &cancel).await.unwrap();
    assert_eq!(listed.len(), originals.len());
    for chunk in &listed {
        let path = dir.path().join(format!("{}.json", chunk.id));
        fs::write(&path, serde_json::to_string_pretty(chunk).unwrap()).unwrap();
    }

    // Wipe the store and restore purely from the snapshot on disk.
    for chunk in &originals {
        store.delete(&chunk.id, &cancel).await.unwrap();
    }
    assert!(store.list_by_repository("widget-service", 10, 0, &cancel).await.unwrap().is_empty());

    let mut restored_count = 0;
    for entry in fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        let raw = fs::read_to_string(entry.path()).unwrap();
        let chunk: Chunk = serde_json::from_str(&raw).unwrap();
        store.store(&chunk, &cancel).await.unwrap();
        restored_count += 1;
    }
    assert_eq!(restored_count, originals.len());

    let search = store
        .search(
            &SearchQuery { repository: Some("widget-service".into()), recency: Recency::AllTime, ..Default::default() },
            &[0.1, 0.2, 0.3, 0.4],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(search.len(), originals.len());

    let stats = store.get_stats(&cancel).await.unwrap();
    assert_eq!(stats.total_chunks, originals.len() as u64);
}

#[tokio::test]
async fn relationship_graph_traversal_over_a_restored_chunk_set() {
    let cancel = CancellationToken::new();

    let backend = MockBackend::new();
    let factory = Arc::new(MockDriverFactory::new(backend));
    let chunk_pool = ConnectionPool::new(PoolConfig { max_size: 4, min_size: 1, ..Default::default() }, factory.clone());
    let rel_pool = ConnectionPool::new(PoolConfig { max_size: 4, min_size: 1, ..Default::default() }, factory);

    let chunks = DriverChunkStore::new(chunk_pool, DIMENSION);
    chunks.initialize(&cancel).await.unwrap();
    let relationships = build_relationship_stack(rel_pool);
    relationships.initialize(&cancel).await.unwrap();

    let problem = sample_chunk("problem-1", ChunkType::Problem, "build is flaky on CI");
    let solution = sample_chunk("solution-1", ChunkType::Solution, "pin the toolchain version");
    chunks.store(&problem, &cancel).await.unwrap();
    chunks.store(&solution, &cancel).await.unwrap();

    relationships
        .store_relationship(&problem.id, &solution.id, RelationType::SolvedBy, 0.9, "ci-bot", &cancel)
        .await
        .unwrap();

    let result = relationships.traverse_graph(&problem.id, 2, &[], &cancel).await.unwrap();
    assert_eq!(result.nodes.len(), 2);
    assert_eq!(result.edges.len(), 1);

    let forward = relationships
        .get_relationships(&RelationshipQuery::new(problem.id.clone(), Direction::Outgoing), &cancel)
        .await
        .unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].target_chunk_id, solution.id);
}
