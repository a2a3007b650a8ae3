//! Statement cache keyed by exact SQL text.
//!
//! Every live statement of a connection sits in one slab, addressed by a
//! [`StatementId`]. Statements compiled while caching is enabled are also
//! indexed by their SQL text so an idle one can be handed out again instead
//! of being recompiled. Several statements may share one text when more than
//! one cursor runs the same query at once.

use crate::statement::Statement;
use std::collections::{HashMap, HashSet};

pub(crate) type StatementId = u64;

#[derive(Debug, Default)]
pub(crate) struct StatementCache {
    statements: HashMap<StatementId, Statement>,
    by_sql: HashMap<String, HashSet<StatementId>>,
    next_id: StatementId,
}

impl StatementCache {
    /// An idle cached statement compiled from exactly `sql`.
    pub(crate) fn cached_statement(&self, sql: &str) -> Option<StatementId> {
        self.by_sql.get(sql)?.iter().copied().find(|id| {
            self.statements
                .get(id)
                .is_some_and(|s| !s.in_use() && !s.is_finalized())
        })
    }

    /// Take ownership of a freshly compiled statement.
    pub(crate) fn insert(&mut self, statement: Statement) -> StatementId {
        let id = self.next_id;
        self.next_id += 1;
        if statement.is_cached() {
            self.by_sql
                .entry(statement.sql().to_string())
                .or_default()
                .insert(id);
        }
        self.statements.insert(id, statement);
        id
    }

    pub(crate) fn get_mut(&mut self, id: StatementId) -> Option<&mut Statement> {
        self.statements.get_mut(&id)
    }

    /// Return a statement after its cursor is done with it.
    ///
    /// Cached statements are reset and become idle; uncached ones are
    /// finalized and forgotten.
    pub(crate) fn release(&mut self, id: StatementId) {
        let Some(statement) = self.statements.get_mut(&id) else {
            return;
        };
        if statement.is_cached() && !statement.is_finalized() {
            statement.reset();
            statement.check_in();
            return;
        }
        if let Some(mut statement) = self.statements.remove(&id) {
            if let Some(ids) = self.by_sql.get_mut(statement.sql()) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_sql.remove(statement.sql());
                }
            }
            statement.finalize();
        }
    }

    /// Drop every cached statement.
    ///
    /// Idle ones are finalized immediately. Ones still held by a cursor lose
    /// their cache entry and are finalized when that cursor lets go.
    pub(crate) fn clear_cached_statements(&mut self) {
        for (_, ids) in self.by_sql.drain() {
            for id in ids {
                let Some(statement) = self.statements.get_mut(&id) else {
                    continue;
                };
                statement.set_cached(false);
                if !statement.in_use() {
                    if let Some(mut statement) = self.statements.remove(&id) {
                        statement.finalize();
                    }
                }
            }
        }
    }

    /// Finalize everything, cached or not.
    pub(crate) fn finalize_all(&mut self) {
        self.by_sql.clear();
        for (_, mut statement) in self.statements.drain() {
            statement.finalize();
        }
    }

    /// Number of statements currently indexed for reuse.
    pub(crate) fn cached_count(&self) -> usize {
        self.by_sql.values().map(HashSet::len).sum()
    }

    /// Use counts of the cached statements compiled from `sql`.
    pub(crate) fn use_counts(&self, sql: &str) -> Vec<u64> {
        let Some(ids) = self.by_sql.get(sql) else {
            return Vec::new();
        };
        let mut counts: Vec<u64> = ids
            .iter()
            .filter_map(|id| self.statements.get(id))
            .map(Statement::use_count)
            .collect();
        counts.sort_unstable();
        counts
    }
}
