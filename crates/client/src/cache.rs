//! Normalized client-side cache.
//!
//! Entities are stored once per `(kind, id)`; query records hold references
//! to them, so an update to an entity is visible through every query that
//! lists it. All writes happen under one lock, which makes each entity merge
//! atomic from the point of view of readers.
//!
//! Optimistic writes return a [`RollbackToken`] that is consumed by exactly
//! one of [`NormalizedCache::commit`] or [`NormalizedCache::rollback`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use taskboard_shared::{SyncError, SyncResult};
use tokio::sync::watch;

pub type Fields = Map<String, Value>;

pub const PLACEHOLDER_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Project,
    Task,
    Comment,
    User,
}

impl EntityKind {
    pub fn typename(&self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::Task => "Task",
            EntityKind::Comment => "TaskComment",
            EntityKind::User => "User",
        }
    }

    pub fn from_typename(name: &str) -> Option<Self> {
        match name {
            "Project" | "ProjectType" => Some(EntityKind::Project),
            "Task" | "TaskType" => Some(EntityKind::Task),
            "TaskComment" | "TaskCommentType" => Some(EntityKind::Comment),
            "User" | "UserType" => Some(EntityKind::User),
            _ => None,
        }
    }
}

/// Identity of a cached entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// A fresh client-generated identity for an entity not yet on the server.
    pub fn placeholder(kind: EntityKind) -> Self {
        Self::new(kind, format!("{PLACEHOLDER_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.typename(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: EntityKey,
    pub fields: Fields,
}

impl Entity {
    pub fn new(key: EntityKey, mut fields: Fields) -> Self {
        fields.insert("id".to_string(), Value::String(key.id.clone()));
        Self { key, fields }
    }

    /// Normalize a response object. `__typename` overrides `kind` when it
    /// names a known entity type. Objects without an `id` are rejected.
    pub fn from_value(kind: EntityKind, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let id = match object.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let kind = object
            .get("__typename")
            .and_then(Value::as_str)
            .and_then(EntityKind::from_typename)
            .unwrap_or(kind);
        let mut fields = object.clone();
        fields.remove("__typename");
        Some(Self::new(EntityKey::new(kind, id), fields))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

/// Key of a query record: operation name plus canonically serialised
/// variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub operation: String,
    pub variables: String,
}

impl QueryKey {
    pub fn new(operation: &str, variables: &Value) -> Self {
        // serde_json maps are ordered, so equal variables serialise equally.
        Self {
            operation: operation.to_string(),
            variables: variables.to_string(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.variables)
    }
}

/// Stored result of a named query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRecord {
    List(Vec<EntityKey>),
    Single(EntityKey),
    /// Non-entity result kept verbatim (aggregates and the like).
    Opaque(Value),
}

impl QueryRecord {
    pub fn refs(&self) -> &[EntityKey] {
        match self {
            QueryRecord::List(keys) => keys,
            QueryRecord::Single(key) => std::slice::from_ref(key),
            QueryRecord::Opaque(_) => &[],
        }
    }

    fn references(&self, key: &EntityKey) -> bool {
        self.refs().contains(key)
    }
}

/// A query record with its references resolved to entities.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    List(Vec<Entity>),
    Single(Entity),
    Opaque(Value),
}

impl QueryData {
    pub fn to_value(&self) -> Value {
        match self {
            QueryData::List(entities) => Value::Array(entities.iter().map(Entity::to_value).collect()),
            QueryData::Single(entity) => entity.to_value(),
            QueryData::Opaque(value) => value.clone(),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

/// Undo record for one optimistic patch.
#[derive(Debug)]
#[must_use = "an optimistic patch must be committed or rolled back"]
pub struct RollbackToken {
    key: EntityKey,
    prior: Option<Fields>,
    patched: Vec<String>,
}

impl RollbackToken {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

#[derive(Default)]
struct CacheState {
    entities: HashMap<EntityKey, Fields>,
    queries: HashMap<QueryKey, QueryRecord>,
    watchers: HashMap<QueryKey, watch::Sender<u64>>,
    /// Placeholder identity -> server identity once committed.
    placeholders: HashMap<EntityKey, EntityKey>,
}

impl CacheState {
    fn merge(&mut self, key: &EntityKey, fields: &Fields) {
        let entry = self.entities.entry(key.clone()).or_default();
        for (name, value) in fields {
            entry.insert(name.clone(), value.clone());
        }
        entry.insert("id".to_string(), Value::String(key.id.clone()));
    }

    fn queries_referencing(&self, keys: &[&EntityKey]) -> HashSet<QueryKey> {
        self.queries
            .iter()
            .filter(|(_, record)| keys.iter().any(|k| record.references(k)))
            .map(|(qk, _)| qk.clone())
            .collect()
    }

    fn notify(&mut self, affected: HashSet<QueryKey>) {
        for key in affected {
            let dead = match self.watchers.get(&key) {
                Some(tx) => {
                    tx.send_modify(|version| *version += 1);
                    tx.receiver_count() == 0
                }
                None => false,
            };
            // Nobody is listening any more; dropping the sender is harmless.
            if dead {
                self.watchers.remove(&key);
            }
        }
    }

    fn strip_refs(&mut self, key: &EntityKey) -> HashSet<QueryKey> {
        let mut affected = HashSet::new();
        self.queries.retain(|qk, record| match record {
            QueryRecord::List(keys) => {
                let before = keys.len();
                keys.retain(|k| k != key);
                if keys.len() != before {
                    affected.insert(qk.clone());
                }
                true
            }
            QueryRecord::Single(k) if *k == *key => {
                affected.insert(qk.clone());
                false
            }
            _ => true,
        });
        affected
    }

    fn rewrite_refs(&mut self, from: &EntityKey, to: &EntityKey) -> HashSet<QueryKey> {
        let mut affected = HashSet::new();
        for (qk, record) in self.queries.iter_mut() {
            match record {
                QueryRecord::List(keys) if keys.contains(from) => {
                    let mut seen = HashSet::new();
                    let rewritten: Vec<EntityKey> = keys
                        .iter()
                        .map(|k| if k == from { to.clone() } else { k.clone() })
                        .filter(|k| seen.insert(k.clone()))
                        .collect();
                    *keys = rewritten;
                    affected.insert(qk.clone());
                }
                QueryRecord::Single(k) if *k == *from => {
                    *k = to.clone();
                    affected.insert(qk.clone());
                }
                _ => {}
            }
        }
        affected
    }
}

/// Process-wide entity and query store. Cloning shares the same store.
#[derive(Clone, Default)]
pub struct NormalizedCache {
    state: Arc<RwLock<CacheState>>,
}

impl NormalizedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Non-blocking lookup of a query record.
    pub fn read(&self, key: &QueryKey) -> Option<QueryRecord> {
        self.read_state().queries.get(key).cloned()
    }

    /// Look up a query record and resolve its references.
    pub fn read_data(&self, key: &QueryKey) -> SyncResult<Option<QueryData>> {
        let state = self.read_state();
        let Some(record) = state.queries.get(key) else {
            return Ok(None);
        };
        let resolve = |k: &EntityKey| {
            state
                .entities
                .get(k)
                .map(|fields| Entity {
                    key: k.clone(),
                    fields: fields.clone(),
                })
                .ok_or_else(|| {
                    crate::log_error!("query {} references missing entity {}", key, k);
                    SyncError::CacheConsistency(format!("{key} references missing {k}"))
                })
        };
        let data = match record {
            QueryRecord::List(keys) => QueryData::List(keys.iter().map(resolve).collect::<Result<_, _>>()?),
            QueryRecord::Single(k) => QueryData::Single(resolve(k)?),
            QueryRecord::Opaque(value) => QueryData::Opaque(value.clone()),
        };
        Ok(Some(data))
    }

    pub fn entity(&self, key: &EntityKey) -> Option<Entity> {
        let state = self.read_state();
        state.entities.get(key).map(|fields| Entity {
            key: key.clone(),
            fields: fields.clone(),
        })
    }

    pub fn entity_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self.read_state().entities.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Replace (or create) a list query and upsert every entity it names.
    pub fn write_query(&self, key: QueryKey, entities: Vec<Entity>) {
        let mut state = self.write_state();
        for entity in &entities {
            state.merge(&entity.key, &entity.fields);
        }
        let refs: Vec<EntityKey> = entities.into_iter().map(|e| e.key).collect();
        let mut affected = state.queries_referencing(&refs.iter().collect::<Vec<_>>());
        affected.insert(key.clone());
        state.queries.insert(key, QueryRecord::List(refs));
        state.notify(affected);
    }

    /// Replace (or create) a single-entity query.
    pub fn write_single(&self, key: QueryKey, entity: Entity) {
        let mut state = self.write_state();
        state.merge(&entity.key, &entity.fields);
        let mut affected = state.queries_referencing(&[&entity.key]);
        affected.insert(key.clone());
        state.queries.insert(key, QueryRecord::Single(entity.key));
        state.notify(affected);
    }

    /// Store a non-entity query result verbatim.
    pub fn write_opaque(&self, key: QueryKey, value: Value) {
        let mut state = self.write_state();
        state.queries.insert(key.clone(), QueryRecord::Opaque(value));
        state.notify(HashSet::from([key]));
    }

    /// Upsert an entity outside any query (mutation results).
    pub fn write_entity(&self, entity: &Entity) {
        let mut state = self.write_state();
        state.merge(&entity.key, &entity.fields);
        let affected = state.queries_referencing(&[&entity.key]);
        state.notify(affected);
    }

    /// Add `entity` to the end of a cached list query. No-op if the query is
    /// not cached or already lists it.
    pub fn append_to_query(&self, query: &QueryKey, entity: &EntityKey) {
        let mut state = self.write_state();
        let appended = match state.queries.get_mut(query) {
            Some(QueryRecord::List(keys)) if !keys.contains(entity) => {
                keys.push(entity.clone());
                true
            }
            _ => false,
        };
        if appended {
            state.notify(HashSet::from([query.clone()]));
        }
    }

    /// Merge `patch` into the entity immediately, synthesizing it if absent.
    pub fn optimistic_patch(&self, key: EntityKey, patch: Fields) -> RollbackToken {
        let mut state = self.write_state();
        let prior = state.entities.get(&key).cloned();
        let patched: Vec<String> = patch.keys().cloned().collect();
        state.merge(&key, &patch);
        let affected = state.queries_referencing(&[&key]);
        state.notify(affected);
        RollbackToken { key, prior, patched }
    }

    /// Replace optimistic state with the server's entity. A placeholder
    /// identity is rewritten to the server identity in every query record.
    /// Returns the final identity.
    pub fn commit(&self, token: RollbackToken, server: Entity) -> EntityKey {
        let mut state = self.write_state();
        let RollbackToken { key, .. } = token;
        let mut affected = HashSet::new();

        if key != server.key {
            state.entities.remove(&key);
            affected.extend(state.rewrite_refs(&key, &server.key));
            state.placeholders.insert(key, server.key.clone());
        }
        state.merge(&server.key, &server.fields);
        affected.extend(state.queries_referencing(&[&server.key]));
        state.notify(affected);
        server.key
    }

    /// Restore the fields the patch touched to their pre-patch values. A
    /// synthesized entity is removed together with every reference to it.
    pub fn rollback(&self, token: RollbackToken) {
        let mut guard = self.write_state();
        let state = &mut *guard;
        let RollbackToken {
            key,
            prior,
            patched,
        } = token;

        let affected = match prior {
            None => {
                state.entities.remove(&key);
                let mut affected = state.strip_refs(&key);
                affected.extend(state.queries_referencing(&[&key]));
                affected
            }
            Some(prior) => {
                match state.entities.get_mut(&key) {
                    Some(current) => {
                        for field in &patched {
                            match prior.get(field) {
                                Some(value) => {
                                    current.insert(field.clone(), value.clone());
                                }
                                None => {
                                    current.remove(field);
                                }
                            }
                        }
                    }
                    None => {
                        state.entities.insert(key.clone(), prior);
                    }
                }
                state.queries_referencing(&[&key])
            }
        };
        state.notify(affected);
    }

    /// Map a committed placeholder to its server identity.
    pub fn resolve(&self, key: &EntityKey) -> EntityKey {
        self.read_state()
            .placeholders
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.clone())
    }

    /// Change notifications for one query. The value is a version counter.
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<u64> {
        let mut state = self.write_state();
        state
            .watchers
            .entry(key.clone())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Drop every entity and query record. Subscribers are notified.
    pub fn clear(&self) {
        let mut state = self.write_state();
        state.entities.clear();
        let affected: HashSet<QueryKey> = state.queries.drain().map(|(k, _)| k).collect();
        state.placeholders.clear();
        state.notify(affected);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    fn project(id: &str, status: &str) -> Entity {
        Entity::new(
            EntityKey::new(EntityKind::Project, id),
            fields(json!({ "name": format!("P{id}"), "status": status })),
        )
    }

    fn projects_key() -> QueryKey {
        QueryKey::new("GetProjects", &json!({}))
    }

    #[test]
    fn entity_from_value_uses_typename_and_numeric_ids() {
        let entity = Entity::from_value(
            EntityKind::Project,
            &json!({ "__typename": "TaskType", "id": 42, "title": "x" }),
        )
        .unwrap();
        assert_eq!(entity.key, EntityKey::new(EntityKind::Task, "42"));
        assert!(!entity.fields.contains_key("__typename"));
        assert_eq!(entity.fields["id"], "42");
        assert!(Entity::from_value(EntityKind::Task, &json!({ "title": "no id" })).is_none());
    }

    #[test]
    fn query_key_ignores_variable_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(QueryKey::new("Q", &a), QueryKey::new("Q", &b));
    }

    #[test]
    fn writes_merge_shallowly() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![project("1", "ACTIVE")]);
        let partial = Entity::new(
            EntityKey::new(EntityKind::Project, "1"),
            fields(json!({ "status": "COMPLETED" })),
        );
        cache.write_entity(&partial);

        let stored = cache.entity(&partial.key).unwrap();
        assert_eq!(stored.fields["status"], "COMPLETED");
        assert_eq!(stored.fields["name"], "P1");
    }

    #[test]
    fn entity_update_is_visible_through_every_query() {
        let cache = NormalizedCache::new();
        let one = QueryKey::new("GetProject", &json!({ "id": "1" }));
        cache.write_query(projects_key(), vec![project("1", "ACTIVE"), project("2", "ACTIVE")]);
        cache.write_single(one.clone(), project("1", "ACTIVE"));
        let mut list_rx = cache.subscribe(&projects_key());
        let mut one_rx = cache.subscribe(&one);

        cache.write_entity(&project("1", "COMPLETED"));

        assert!(list_rx.has_changed().unwrap());
        assert!(one_rx.has_changed().unwrap());
        list_rx.mark_unchanged();
        one_rx.mark_unchanged();
        let Some(QueryData::List(list)) = cache.read_data(&projects_key()).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(list[0].fields["status"], "COMPLETED");
        let Some(QueryData::Single(single)) = cache.read_data(&one).unwrap() else {
            panic!("expected single");
        };
        assert_eq!(single.fields["status"], "COMPLETED");
    }

    #[test]
    fn rollback_restores_prior_state_exactly() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![project("1", "ACTIVE")]);
        let key = EntityKey::new(EntityKind::Project, "1");
        let before = cache.entity(&key).unwrap();

        let token = cache.optimistic_patch(
            key.clone(),
            fields(json!({ "status": "COMPLETED", "dueDate": "2025-01-01" })),
        );
        assert_eq!(cache.entity(&key).unwrap().fields["status"], "COMPLETED");
        cache.rollback(token);

        assert_eq!(cache.entity(&key).unwrap(), before);
        assert_eq!(
            serde_json::to_vec(&cache.entity(&key).unwrap().to_value()).unwrap(),
            serde_json::to_vec(&before.to_value()).unwrap()
        );
    }

    #[test]
    fn rollback_of_synthesized_entity_removes_all_references() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![project("1", "ACTIVE")]);
        let temp = EntityKey::placeholder(EntityKind::Project);
        let token = cache.optimistic_patch(temp.clone(), fields(json!({ "name": "new" })));
        cache.append_to_query(&projects_key(), &temp);
        assert_eq!(cache.read(&projects_key()).unwrap().refs().len(), 2);

        cache.rollback(token);
        assert!(cache.entity(&temp).is_none());
        assert_eq!(
            cache.read(&projects_key()).unwrap().refs(),
            &[EntityKey::new(EntityKind::Project, "1")]
        );
    }

    #[test]
    fn rollback_leaves_unrelated_concurrent_fields_alone() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![project("1", "ACTIVE")]);
        let key = EntityKey::new(EntityKind::Project, "1");
        let status = cache.optimistic_patch(key.clone(), fields(json!({ "status": "COMPLETED" })));
        let name = cache.optimistic_patch(key.clone(), fields(json!({ "name": "Renamed" })));

        cache.rollback(status);
        let current = cache.entity(&key).unwrap();
        assert_eq!(current.fields["status"], "ACTIVE");
        assert_eq!(current.fields["name"], "Renamed");
        cache.rollback(name);
        assert_eq!(cache.entity(&key).unwrap().fields["name"], "P1");
    }

    #[test]
    fn commit_rewrites_placeholder_everywhere() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![]);
        let single = QueryKey::new("Pinned", &json!({}));
        let temp = EntityKey::placeholder(EntityKind::Project);
        let token = cache.optimistic_patch(temp.clone(), fields(json!({ "name": "new" })));
        cache.append_to_query(&projects_key(), &temp);
        cache.write_single(single.clone(), cache.entity(&temp).unwrap());

        let final_key = cache.commit(token, project("99", "ACTIVE"));

        assert_eq!(final_key, EntityKey::new(EntityKind::Project, "99"));
        assert_eq!(cache.read(&projects_key()).unwrap().refs(), &[final_key.clone()]);
        assert_eq!(cache.read(&single).unwrap().refs(), &[final_key.clone()]);
        assert!(cache.entity(&temp).is_none());
        assert_eq!(cache.resolve(&temp), final_key);
        assert!(cache.entity_keys().iter().all(|k| !k.is_placeholder()));
    }

    #[test]
    fn commit_collapses_duplicate_after_refetch() {
        let cache = NormalizedCache::new();
        let temp = EntityKey::placeholder(EntityKind::Project);
        let token = cache.optimistic_patch(temp.clone(), fields(json!({ "name": "new" })));
        cache.write_query(
            projects_key(),
            vec![cache.entity(&temp).unwrap(), project("99", "ACTIVE")],
        );

        cache.commit(token, project("99", "ACTIVE"));
        assert_eq!(
            cache.read(&projects_key()).unwrap().refs(),
            &[EntityKey::new(EntityKind::Project, "99")]
        );
    }

    #[test]
    fn missing_entity_is_a_consistency_error() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![project("1", "ACTIVE")]);
        // Bypass the public API to break the invariant.
        cache
            .write_state()
            .entities
            .remove(&EntityKey::new(EntityKind::Project, "1"));
        assert!(matches!(
            cache.read_data(&projects_key()),
            Err(SyncError::CacheConsistency(_))
        ));
    }

    #[test]
    fn opaque_records_decode_verbatim() {
        let cache = NormalizedCache::new();
        let key = QueryKey::new("GetProjectStats", &json!({ "projectId": "1" }));
        cache.write_opaque(
            key.clone(),
            json!({ "totalTasks": 4, "completedTasks": 1, "completionRate": 25.0 }),
        );
        let stats: taskboard_shared::ProjectStats =
            cache.read_data(&key).unwrap().unwrap().decode().unwrap();
        assert_eq!(stats.total_tasks, 4);
    }

    #[test]
    fn clear_notifies_and_empties() {
        let cache = NormalizedCache::new();
        cache.write_query(projects_key(), vec![project("1", "ACTIVE")]);
        let rx = cache.subscribe(&projects_key());
        cache.clear();
        assert!(rx.has_changed().unwrap());
        assert!(cache.read(&projects_key()).is_none());
        assert!(cache.entity_keys().is_empty());
    }
}
