//! Per-connection statement and description caches.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::protocol::types::{FieldFormat, Oid};
use crate::result::ResultField;
use crate::types::TypeRef;

/// Identity of a server-side statement: the SQL text plus the parameter
/// types it was parsed with. `None` lets the server infer that slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementCacheKey {
    pub sql: String,
    pub param_types: Vec<Option<Oid>>,
}

impl StatementCacheKey {
    pub fn new(sql: impl Into<String>, param_types: Vec<Option<Oid>>) -> Self {
        Self {
            sql: sql.into(),
            param_types,
        }
    }

    /// OIDs for a Parse message, 0 for unspecified.
    pub fn parse_oids(&self) -> Vec<Oid> {
        self.param_types.iter().map(|oid| oid.unwrap_or(0)).collect()
    }

    /// Key of the describe that fills this key's unspecified slots.
    ///
    /// With every slot unspecified the server infers all of them, which is
    /// the same statement as parsing without any types.
    pub fn describe_key(&self) -> StatementCacheKey {
        if self.param_types.iter().all(Option::is_none) {
            StatementCacheKey::new(self.sql.clone(), Vec::new())
        } else {
            self.clone()
        }
    }
}

/// Parameter and result types the server reported for a statement.
#[derive(Debug, Clone)]
pub struct Description {
    pub param_types: Vec<TypeRef>,
    /// Formats already chosen for execution.
    pub fields: Vec<ResultField>,
}

impl Description {
    pub fn result_formats(&self) -> Vec<FieldFormat> {
        self.fields.iter().map(|field| field.format).collect()
    }

    pub fn returns_rows(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// Named statement living on the server.
#[derive(Debug, Clone)]
pub struct CachedStatement {
    pub name: String,
    pub description: Arc<Description>,
}

/// LRU caches of prepared statements and descriptions.
///
/// Both are keyed by SQL plus parameter types: the types a statement was
/// parsed with decide the types the server reports back.
///
/// Statements pushed out of the cache still exist on the server; their names
/// queue up until [`StatementCache::take_evicted`] hands them over to be
/// closed with the next request.
pub struct StatementCache {
    statements: LruCache<StatementCacheKey, Arc<CachedStatement>>,
    descriptions: LruCache<StatementCacheKey, Arc<Description>>,
    evicted: Vec<String>,
    next_id: u64,
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

impl StatementCache {
    pub fn new(statement_capacity: usize, description_capacity: usize) -> Self {
        Self {
            statements: LruCache::new(capacity(statement_capacity)),
            descriptions: LruCache::new(capacity(description_capacity)),
            evicted: Vec::new(),
            next_id: 0,
        }
    }

    /// Look up a statement, marking it recently used.
    pub fn get(&mut self, key: &StatementCacheKey) -> Option<Arc<CachedStatement>> {
        self.statements.get(key).map(Arc::clone)
    }

    /// Unique server-side name for the next statement.
    pub fn next_statement_name(&mut self) -> String {
        self.next_id += 1;
        format!("pgcore_{}", self.next_id)
    }

    pub fn insert(&mut self, key: StatementCacheKey, statement: Arc<CachedStatement>) {
        let name = statement.name.clone();
        if let Some((old_key, old)) = self.statements.push(key, statement)
            && old.name != name
        {
            tracing::debug!("statement {} evicted ({})", old.name, old_key.sql);
            self.evicted.push(old.name.clone());
        }
    }

    /// Forget a statement the server no longer knows or has invalidated,
    /// along with every description of its SQL.
    pub fn invalidate(&mut self, key: &StatementCacheKey) {
        if let Some(old) = self.statements.pop(key) {
            self.evicted.push(old.name.clone());
        }
        let stale: Vec<StatementCacheKey> = self
            .descriptions
            .iter()
            .filter(|(described, _)| described.sql == key.sql)
            .map(|(described, _)| described.clone())
            .collect();
        for described in &stale {
            self.descriptions.pop(described);
        }
    }

    pub fn description(&mut self, key: &StatementCacheKey) -> Option<Arc<Description>> {
        self.descriptions.get(key).map(Arc::clone)
    }

    pub fn insert_description(&mut self, key: StatementCacheKey, description: Arc<Description>) {
        self.descriptions.put(key, description);
    }

    /// Names of evicted statements still to be closed on the server.
    pub fn take_evicted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.evicted)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn description_count(&self) -> usize {
        self.descriptions.len()
    }

    /// Drop everything, including pending closes.
    pub fn clear(&mut self) {
        self.statements.clear();
        self.descriptions.clear();
        self.evicted.clear();
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("statements", &self.statements.len())
            .field("descriptions", &self.descriptions.len())
            .field("evicted", &self.evicted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::types::test_support::int4;

    fn statement(cache: &mut StatementCache) -> Arc<CachedStatement> {
        Arc::new(CachedStatement {
            name: cache.next_statement_name(),
            description: Arc::new(Description {
                param_types: vec![int4()],
                fields: Vec::new(),
            }),
        })
    }

    #[test]
    fn key_includes_parameter_types() {
        let sql = "SELECT * FROM t WHERE id = $1";
        let mut cache = StatementCache::new(4, 4);
        let first = statement(&mut cache);
        cache.insert(StatementCacheKey::new(sql, vec![Some(oid::INT4)]), Arc::clone(&first));

        let same = cache.get(&StatementCacheKey::new(sql, vec![Some(oid::INT4)]));
        assert!(same.is_some_and(|s| Arc::ptr_eq(&s, &first)));
        assert!(cache.get(&StatementCacheKey::new(sql, vec![Some(oid::INT8)])).is_none());
        assert!(cache.get(&StatementCacheKey::new(sql, vec![None])).is_none());
    }

    #[test]
    fn evicted_names_wait_for_close() {
        let mut cache = StatementCache::new(2, 2);
        for sql in ["SELECT 1", "SELECT 2", "SELECT 3"] {
            let stmt = statement(&mut cache);
            cache.insert(StatementCacheKey::new(sql, Vec::new()), stmt);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.take_evicted(), ["pgcore_1"]);
        assert!(cache.take_evicted().is_empty());

        cache.invalidate(&StatementCacheKey::new("SELECT 3", Vec::new()));
        assert_eq!(cache.take_evicted(), ["pgcore_3"]);
    }

    #[test]
    fn recently_used_entries_survive() {
        let mut cache = StatementCache::new(2, 2);
        let a = StatementCacheKey::new("SELECT 'a'", Vec::new());
        let b = StatementCacheKey::new("SELECT 'b'", Vec::new());
        let stmt = statement(&mut cache);
        cache.insert(a.clone(), stmt);
        let stmt = statement(&mut cache);
        cache.insert(b.clone(), stmt);
        assert!(cache.get(&a).is_some());
        let stmt = statement(&mut cache);
        cache.insert(StatementCacheKey::new("SELECT 'c'", Vec::new()), stmt);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn descriptions_follow_parameter_types() {
        let sql = "SELECT ($1 || 'x')::text";
        let mut cache = StatementCache::new(4, 4);
        let typed = StatementCacheKey::new(sql, vec![Some(oid::INT8)]);
        let description = statement(&mut cache).description.clone();
        cache.insert_description(typed.clone(), description);

        let untyped = StatementCacheKey::new(sql, vec![None]);
        assert!(cache.description(&untyped.describe_key()).is_none());
        assert!(cache.description(&typed.describe_key()).is_some());

        let inferred = statement(&mut cache).description.clone();
        cache.insert_description(untyped.describe_key(), inferred);
        cache.invalidate(&typed);
        assert_eq!(cache.description_count(), 0);
    }

    #[test]
    fn describe_key_drops_all_unspecified_types() {
        let key = StatementCacheKey::new("SELECT $1, $2", vec![None, None]);
        assert!(key.describe_key().param_types.is_empty());
        let partial = StatementCacheKey::new("SELECT $1, $2", vec![None, Some(oid::INT4)]);
        assert_eq!(partial.describe_key(), partial);
    }

    #[test]
    fn parse_oids_mark_inferred_slots() {
        let key = StatementCacheKey::new("SELECT $1, $2", vec![None, Some(oid::TEXT)]);
        assert_eq!(key.parse_oids(), [0, oid::TEXT]);
    }
}
