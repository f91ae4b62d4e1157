//! Payload codec (§6): converts between the domain model and the flat
//! key→value points the driver actually stores. Kept separate from the
//! stores themselves so the wire layout can be audited in one place.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{
    Chunk, ChunkMetadata, ChunkType, ConfidenceFactors, ConfidenceSource, Difficulty, Outcome, RelationType,
    Relationship,
};
use crate::driver::{Payload, PayloadValue, Point};
use crate::error::{MemoryError, Result};

const EXTENDED_PREFIX: &str = "ext_";
const META_PREFIX: &str = "meta_";

fn require_str(payload: &Payload, field: &str) -> Result<String> {
    payload
        .get(field)
        .and_then(PayloadValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| MemoryError::validation(format!("corrupt payload: missing or non-string field `{field}`")))
}

fn optional_str(payload: &Payload, field: &str) -> Option<String> {
    payload.get(field).and_then(PayloadValue::as_str).map(str::to_string)
}

fn require_i64(payload: &Payload, field: &str) -> Result<i64> {
    payload
        .get(field)
        .and_then(PayloadValue::as_i64)
        .ok_or_else(|| MemoryError::validation(format!("corrupt payload: missing or non-integer field `{field}`")))
}

fn string_list(payload: &Payload, field: &str) -> Vec<String> {
    payload.get(field).and_then(PayloadValue::as_string_list).map(<[String]>::to_vec).unwrap_or_default()
}

fn timestamp_from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

pub fn chunk_to_point(chunk: &Chunk) -> Point {
    let mut payload: Payload = HashMap::new();
    payload.insert("content".into(), chunk.content.clone().into());
    payload.insert("summary".into(), chunk.summary.clone().into());
    payload.insert("type".into(), chunk.chunk_type.as_str().into());
    payload.insert("repository".into(), chunk.metadata.repository.clone().into());
    payload.insert("branch".into(), chunk.metadata.branch.clone().into());
    payload.insert("session_id".into(), chunk.session_id.clone().into());
    payload.insert("timestamp".into(), chunk.timestamp_secs().into());

    if let Some(outcome) = chunk.metadata.outcome {
        payload.insert("outcome".into(), outcome.as_str().into());
    }
    if let Some(difficulty) = chunk.metadata.difficulty {
        payload.insert("difficulty".into(), difficulty.as_str().into());
    }
    if let Some(spent) = chunk.metadata.time_spent {
        payload.insert("time_spent".into(), spent.into());
    }
    if !chunk.metadata.tags.is_empty() {
        let mut tags: Vec<String> = chunk.metadata.tags.iter().cloned().collect();
        tags.sort();
        payload.insert("tags".into(), tags.into());
    }
    if !chunk.metadata.tools_used.is_empty() {
        payload.insert("tools_used".into(), chunk.metadata.tools_used.clone().into());
    }
    if !chunk.metadata.files_modified.is_empty() {
        payload.insert("files_modified".into(), chunk.metadata.files_modified.clone().into());
    }
    for (key, value) in &chunk.metadata.extended {
        payload.insert(format!("{EXTENDED_PREFIX}{key}"), value.clone().into());
    }

    Point { id: chunk.id.clone(), vector: chunk.embedding.clone(), payload }
}

pub fn point_to_chunk(point: Point) -> Result<Chunk> {
    let payload = point.payload;
    let chunk_type = ChunkType::from_str(&require_str(&payload, "type")?)
        .ok_or_else(|| MemoryError::validation("corrupt payload: unknown chunk type"))?;

    let mut extended = HashMap::new();
    for (key, value) in &payload {
        if let Some(stripped) = key.strip_prefix(EXTENDED_PREFIX) {
            if let Some(s) = value.as_str() {
                extended.insert(stripped.to_string(), s.to_string());
            }
        }
    }

    let metadata = ChunkMetadata {
        repository: require_str(&payload, "repository")?,
        branch: optional_str(&payload, "branch").unwrap_or_default(),
        files_modified: string_list(&payload, "files_modified"),
        tools_used: string_list(&payload, "tools_used"),
        outcome: optional_str(&payload, "outcome").and_then(|s| Outcome::from_str(&s)),
        difficulty: optional_str(&payload, "difficulty").and_then(|s| Difficulty::from_str(&s)),
        tags: string_list(&payload, "tags").into_iter().collect(),
        time_spent: payload.get("time_spent").and_then(PayloadValue::as_i64),
        extended,
    };

    Ok(Chunk {
        id: point.id,
        session_id: require_str(&payload, "session_id")?,
        timestamp: timestamp_from_secs(require_i64(&payload, "timestamp")?),
        chunk_type,
        content: require_str(&payload, "content")?,
        summary: require_str(&payload, "summary")?,
        metadata,
        embedding: point.vector,
    })
}

pub fn relationship_to_point(rel: &Relationship) -> Point {
    let mut payload: Payload = HashMap::new();
    payload.insert("source_chunk_id".into(), rel.source_chunk_id.clone().into());
    payload.insert("target_chunk_id".into(), rel.target_chunk_id.clone().into());
    payload.insert("relation_type".into(), rel.relation_type.as_str().into());
    payload.insert("confidence".into(), rel.confidence.into());
    payload.insert("confidence_source".into(), rel.confidence_source.as_str().into());
    payload.insert("created_at".into(), rel.created_at.timestamp().into());
    payload.insert("created_by".into(), rel.created_by.clone().into());
    payload.insert("validation_count".into(), (rel.validation_count as i64).into());

    if let Some(v) = rel.confidence_factors.user_certainty {
        payload.insert("user_certainty".into(), v.into());
    }
    if let Some(v) = rel.confidence_factors.consistency_score {
        payload.insert("consistency_score".into(), v.into());
    }
    if let Some(v) = rel.confidence_factors.corroboration_count {
        payload.insert("corroboration_count".into(), v.into());
    }
    if let Some(last_validated) = rel.last_validated {
        payload.insert("last_validated".into(), last_validated.timestamp().into());
    }
    for (key, value) in &rel.metadata {
        payload.insert(format!("{META_PREFIX}{key}"), value.clone().into());
    }

    Point { id: rel.id.clone(), vector: vec![0.0; crate::domain::RELATIONSHIP_VECTOR_DIMENSION], payload }
}

pub fn point_to_relationship(point: Point) -> Result<Relationship> {
    let payload = point.payload;
    let relation_type = RelationType::from_str(&require_str(&payload, "relation_type")?)
        .ok_or_else(|| MemoryError::validation("corrupt payload: unknown relation type"))?;
    let confidence_source = ConfidenceSource::from_str(&require_str(&payload, "confidence_source")?)
        .ok_or_else(|| MemoryError::validation("corrupt payload: unknown confidence source"))?;

    let mut metadata = HashMap::new();
    for (key, value) in &payload {
        if let Some(stripped) = key.strip_prefix(META_PREFIX) {
            if let Some(s) = value.as_str() {
                metadata.insert(stripped.to_string(), s.to_string());
            }
        }
    }

    Ok(Relationship {
        id: point.id,
        source_chunk_id: require_str(&payload, "source_chunk_id")?,
        target_chunk_id: require_str(&payload, "target_chunk_id")?,
        relation_type,
        confidence: payload.get("confidence").and_then(PayloadValue::as_f64).unwrap_or(0.0),
        confidence_source,
        confidence_factors: ConfidenceFactors {
            user_certainty: payload.get("user_certainty").and_then(PayloadValue::as_f64),
            consistency_score: payload.get("consistency_score").and_then(PayloadValue::as_f64),
            corroboration_count: payload.get("corroboration_count").and_then(PayloadValue::as_i64),
        },
        created_at: timestamp_from_secs(require_i64(&payload, "created_at")?),
        created_by: require_str(&payload, "created_by")?,
        last_validated: payload.get("last_validated").and_then(PayloadValue::as_i64).map(timestamp_from_secs),
        validation_count: require_i64(&payload, "validation_count").unwrap_or(0).max(0) as u64,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChunkType;

    #[test]
    fn chunk_roundtrips_through_a_point() {
        let mut chunk = Chunk::new("sess-1", ChunkType::Problem, "body", "short", vec![0.1, 0.2, 0.3]);
        chunk.metadata.repository = "alpha".into();
        chunk.metadata.tags = ["a".to_string(), "b".to_string()].into_iter().collect();
        chunk.metadata.extended.insert("source".into(), "migration".into());

        let point = chunk_to_point(&chunk);
        let back = point_to_chunk(point).unwrap();

        assert_eq!(back.id, chunk.id);
        assert_eq!(back.content, chunk.content);
        assert_eq!(back.metadata.repository, "alpha");
        assert_eq!(back.metadata.tags, chunk.metadata.tags);
        assert_eq!(back.metadata.extended.get("source"), Some(&"migration".to_string()));
        assert_eq!(back.timestamp.timestamp(), chunk.timestamp_secs());
    }

    #[test]
    fn relationship_roundtrips_through_a_point() {
        let rel = Relationship::new("a", "b", RelationType::LedTo, 0.9, ConfidenceSource::User, "tester");
        let point = relationship_to_point(&rel);
        let back = point_to_relationship(point).unwrap();
        assert_eq!(back.source_chunk_id, "a");
        assert_eq!(back.target_chunk_id, "b");
        assert_eq!(back.confidence, 0.9);
    }

    #[test]
    fn point_missing_required_field_is_validation_error() {
        let point = Point { id: "x".into(), vector: vec![], payload: HashMap::new() };
        let err = point_to_chunk(point).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }
}
