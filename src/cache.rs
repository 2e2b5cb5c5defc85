use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Read queries that go through the cache. Each kind carries its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedQuery {
    Users,
    PendingUsers,
    UserCountsByGroup,
    Institutions,
    InstitutionStats,
    InstitutionClasses,
    Tariffs,
    TeacherClasses,
    StudentClasses,
    ClassCollaborators,
    TeacherCollaborations,
    PendingRequestsForTeacher,
    AllPendingRequests,
    TeacherSubjects,
    ClassSubjects,
    Categories,
    SubjectAssignments,
    ClassAssignments,
    SubjectSubmissions,
    StudentGrades,
    Materials,
}

impl CachedQuery {
    pub fn ttl(self) -> Duration {
        let secs = match self {
            CachedQuery::Institutions | CachedQuery::Tariffs => 300,
            CachedQuery::PendingUsers
            | CachedQuery::PendingRequestsForTeacher
            | CachedQuery::AllPendingRequests => 30,
            _ => 60,
        };
        Duration::from_secs(secs)
    }
}

struct CacheEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

/// Read-through cache in front of the data-access layer.
///
/// Entries are keyed by query kind plus a parameter string and expire after
/// the kind's TTL. Mutating handlers call `invalidate` with every kind they
/// affect; nothing is evicted otherwise.
pub struct QueryCache {
    enabled: bool,
    entries: HashMap<(CachedQuery, String), CacheEntry>,
}

impl QueryCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get_or_load<E, F>(
        &mut self,
        query: CachedQuery,
        params: &str,
        load: F,
    ) -> Result<serde_json::Value, E>
    where
        F: FnOnce() -> Result<serde_json::Value, E>,
    {
        self.get_or_load_at(query, params, Instant::now(), load)
    }

    fn get_or_load_at<E, F>(
        &mut self,
        query: CachedQuery,
        params: &str,
        now: Instant,
        load: F,
    ) -> Result<serde_json::Value, E>
    where
        F: FnOnce() -> Result<serde_json::Value, E>,
    {
        if !self.enabled {
            return load();
        }

        let key = (query, params.to_string());
        if let Some(entry) = self.entries.get(&key) {
            if now.saturating_duration_since(entry.stored_at) < query.ttl() {
                tracing::trace!(?query, params, "cache hit");
                return Ok(entry.value.clone());
            }
        }

        tracing::trace!(?query, params, "cache miss");
        let value = load()?;
        self.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                stored_at: now,
            },
        );
        Ok(value)
    }

    pub fn invalidate(&mut self, queries: &[CachedQuery]) {
        if queries.is_empty() {
            return;
        }
        self.entries.retain(|(q, _), _| !queries.contains(q));
        tracing::debug!(?queries, "cache invalidated");
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
