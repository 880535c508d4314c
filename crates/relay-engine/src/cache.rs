use dashmap::DashMap;

/// Process-wide `query text -> answer text` map.
///
/// Entries are never evicted; they live until the process exits.
#[derive(Debug, Default)]
pub struct CompletionCache {
    entries: DashMap<String, String>,
}

impl CompletionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query: &str) -> Option<String> {
        self.entries.get(query).map(|e| e.value().clone())
    }

    /// Last writer wins. Returns the replaced answer, if any.
    pub fn insert(&self, query: impl Into<String>, answer: impl Into<String>) -> Option<String> {
        self.entries.insert(query.into(), answer.into())
    }

    pub fn contains(&self, query: &str) -> bool {
        self.entries.contains_key(query)
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

    #[test]
    fn keyed_by_exact_text() {
        let cache = CompletionCache::new();
        cache.insert("中国在哪个洲", "亚洲");
        assert_eq!(cache.get("中国在哪个洲").as_deref(), Some("亚洲"));
        assert!(cache.get("中国在哪个洲 ").is_none());
        assert!(cache.contains("中国在哪个洲"));
    }

    #[test]
    fn last_writer_wins() {
        let cache = CompletionCache::new();
        assert!(cache.insert("q", "first").is_none());
        assert_eq!(cache.insert("q", "second").as_deref(), Some("first"));
        assert_eq!(cache.get("q").as_deref(), Some("second"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_writers() {
        let cache = std::sync::Arc::new(CompletionCache::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = std::sync::Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.insert(format!("q{}", i % 4), format!("a{i}"));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
