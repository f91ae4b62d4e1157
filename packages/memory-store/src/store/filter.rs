//! Filter builder (§4.E): compiles a [`SearchQuery`] into the backend's
//! filter tree. Deterministic for identical inputs: no wall-clock read
//! besides the caller-supplied `now`, so tests can fix it.

use chrono::{DateTime, Utc};

use crate::domain::{MemoryTier, Recency, SearchQuery};
use crate::driver::{FieldCondition, Filter, PayloadValue};

const RECENT_WINDOW_DAYS: i64 = 7;
const LAST_MONTH_WINDOW_DAYS: i64 = 30;

/// Builds the `must`-conjunction filter for a chunk search. Returns `None`
/// when no condition applies, per §4.E.
///
/// The `global` sentinel resolves to "no repository restriction at all"
/// (cross-project visibility), not a literal `repository = global` match.
/// See DESIGN.md.
pub fn build_chunk_filter(query: &SearchQuery, now: DateTime<Utc>) -> Option<Filter> {
    let mut filter = Filter::default();

    if let Some(repo) = &query.repository {
        if let MemoryTier::Project(repo) = MemoryTier::from_repository(repo) {
            filter.must.push(FieldCondition::Equals { field: "repository".into(), value: repo.into() });
        }
    }

    if !query.types.is_empty() {
        let values: Vec<PayloadValue> = query.types.iter().map(|t| t.as_str().into()).collect();
        filter.must.push(FieldCondition::MatchAny { field: "type".into(), values });
    }

    match query.recency {
        Recency::Recent => {
            let cutoff = now - chrono::Duration::days(RECENT_WINDOW_DAYS);
            filter.must.push(FieldCondition::GreaterOrEqual { field: "timestamp".into(), value: cutoff.timestamp() });
        }
        Recency::LastMonth => {
            let cutoff = now - chrono::Duration::days(LAST_MONTH_WINDOW_DAYS);
            filter.must.push(FieldCondition::GreaterOrEqual { field: "timestamp".into(), value: cutoff.timestamp() });
        }
        Recency::AllTime => {}
    }

    if filter.is_empty() {
        None
    } else {
        Some(filter)
    }
}

/// Filter for a retention sweep: every chunk older than `cutoff` (§4.C `cleanup`).
pub fn build_retention_filter(cutoff: DateTime<Utc>) -> Filter {
    Filter { must: vec![FieldCondition::LessThan { field: "timestamp".into(), value: cutoff.timestamp() }], should: vec![] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChunkType, GLOBAL_REPOSITORY};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-15T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn empty_query_has_no_filter() {
        let query = SearchQuery { recency: Recency::AllTime, ..Default::default() };
        assert!(build_chunk_filter(&query, now()).is_none());
    }

    #[test]
    fn global_repository_adds_no_restriction() {
        let query = SearchQuery { repository: Some(GLOBAL_REPOSITORY.to_string()), recency: Recency::AllTime, ..Default::default() };
        assert!(build_chunk_filter(&query, now()).is_none());
    }

    #[test]
    fn concrete_repository_is_strict_equality() {
        let query = SearchQuery { repository: Some("alpha".to_string()), recency: Recency::AllTime, ..Default::default() };
        let filter = build_chunk_filter(&query, now()).unwrap();
        assert_eq!(filter.must, vec![FieldCondition::Equals { field: "repository".into(), value: "alpha".into() }]);
    }

    #[test]
    fn types_and_recency_combine_in_must() {
        let query = SearchQuery { types: vec![ChunkType::Problem], recency: Recency::Recent, ..Default::default() };
        let filter = build_chunk_filter(&query, now()).unwrap();
        assert_eq!(filter.must.len(), 2);
    }

    #[test]
    fn is_deterministic_for_identical_inputs() {
        let query = SearchQuery { repository: Some("alpha".into()), types: vec![ChunkType::Solution], recency: Recency::LastMonth, ..Default::default() };
        assert_eq!(build_chunk_filter(&query, now()), build_chunk_filter(&query, now()));
    }
}
