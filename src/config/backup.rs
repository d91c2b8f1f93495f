//! Bounded rollback history.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use serde_json::Value;

/// Tree snapshot taken just before a commit replaced it.
#[derive(Debug, Clone)]
pub struct Backup {
    pub timestamp: SystemTime,
    pub tree: Arc<Value>,
}

/// Most-recent-first list of at most `capacity` backups.
pub struct BackupHistory {
    entries: RwLock<VecDeque<Backup>>,
    capacity: usize,
}

impl BackupHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Prepend `tree`, evicting the oldest entries beyond capacity.
    pub fn push(&self, tree: Arc<Value>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push_front(Backup {
            timestamp: SystemTime::now(),
            tree,
        });
        entries.truncate(self.capacity);
    }

    pub fn get(&self, index: usize) -> Option<Backup> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Copy of the whole history, most recent first.
    pub fn list(&self) -> Vec<Backup> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bounded_most_recent_first() {
        let history = BackupHistory::new(3);
        for i in 0..5 {
            history.push(Arc::new(json!({ "n": i })));
        }

        let trees: Vec<Value> = history.list().iter().map(|b| (*b.tree).clone()).collect();
        assert_eq!(trees, vec![json!({ "n": 4 }), json!({ "n": 3 }), json!({ "n": 2 })]);
        assert_eq!(history.len(), 3);
        assert!(history.get(3).is_none());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let history = BackupHistory::new(0);
        history.push(Arc::new(json!({})));
        assert!(history.is_empty());
    }
}
