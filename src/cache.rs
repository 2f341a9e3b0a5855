//! In-memory record of when fields were last stored at a destination.
//!
//! Owned by a storage plugin instance and lives only as long as it does. Safe
//! to share between tasks; writes are last-write-wins.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};

use crate::secret::DestinationRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub destination: DestinationRef,
    pub field: String,
}

impl CacheKey {
    pub fn new(destination: &DestinationRef, field: &str) -> Self {
        Self {
            destination: destination.clone(),
            field: field.to_owned(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SavedAtCache {
    entries: DashMap<CacheKey, DateTime<Utc>>,
    loaded: DashSet<DestinationRef>,
}

impl SavedAtCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, destination: &DestinationRef, field: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(&CacheKey::new(destination, field))
            .map(|entry| *entry.value())
    }

    pub fn set(&self, destination: &DestinationRef, field: &str, at: DateTime<Utc>) {
        self.entries.insert(CacheKey::new(destination, field), at);
    }

    /// Records that every stored field of `destination` has been fetched, so
    /// a miss afterwards means "never stored" rather than "not looked up".
    pub fn mark_loaded(&self, destination: &DestinationRef) {
        self.loaded.insert(destination.clone());
    }

    pub fn is_loaded(&self, destination: &DestinationRef) -> bool {
        self.loaded.contains(destination)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_miss_then_hit() {
        let cache = SavedAtCache::new();
        let repo = DestinationRef::new("owner/repo");
        assert_eq!(cache.get(&repo, "AWS_ACCESS_KEY_ID"), None);

        let at = Utc::now();
        cache.set(&repo, "AWS_ACCESS_KEY_ID", at);
        assert_eq!(cache.get(&repo, "AWS_ACCESS_KEY_ID"), Some(at));
        assert_eq!(cache.get(&repo, "AWS_SECRET_ACCESS_KEY"), None);
    }

    #[test]
    fn test_keys_are_scoped_by_destination() {
        let cache = SavedAtCache::new();
        let a = DestinationRef::new("owner/a");
        let b = DestinationRef::new("owner/b");
        cache.set(&a, "TOKEN", Utc::now());

        assert!(cache.get(&a, "TOKEN").is_some());
        assert!(cache.get(&b, "TOKEN").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = SavedAtCache::new();
        let repo = DestinationRef::new("owner/repo");
        let earlier = Utc::now() - Duration::hours(5);
        let later = Utc::now();

        cache.set(&repo, "TOKEN", later);
        cache.set(&repo, "TOKEN", earlier);
        assert_eq!(cache.get(&repo, "TOKEN"), Some(earlier));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_loaded_marker() {
        let cache = SavedAtCache::new();
        let repo = DestinationRef::new("owner/repo");
        assert!(!cache.is_loaded(&repo));
        cache.mark_loaded(&repo);
        assert!(cache.is_loaded(&repo));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = Arc::new(SavedAtCache::new());
        let repo = DestinationRef::new("owner/repo");

        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&cache);
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                cache.set(&repo, &format!("FIELD_{}", i), Utc::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 16);
    }
}
