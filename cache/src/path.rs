use std::time::Duration;

use crate::ExpiringMap;

/// Routing hints: top-level metric prefix to the backends known to carry it.
///
/// Contents are advisory. A missing or expired prefix widens the fan-out to
/// every backend but never changes the merged result, so nothing here is
/// allowed to matter for correctness.
#[derive(Debug)]
pub struct PathCache<T> {
    map: ExpiringMap<String, Vec<T>>,
}

impl<T: Clone> PathCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: ExpiringMap::new(ttl),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.map.ttl()
    }

    /// Backends recorded for `prefix`, if the entry is still live.
    pub fn get(&self, prefix: &str) -> Option<Vec<T>> {
        self.map.get(&prefix.to_owned())
    }

    /// Record the backends for `prefix` with a fresh TTL.
    pub fn set(&self, prefix: impl Into<String>, backends: Vec<T>) {
        self.map.set(prefix.into(), backends)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn get_returns_full_list() {
        let cache = PathCache::new(Duration::from_secs(60));
        cache.set("carbon", vec!["b1", "b2"]);

        assert_eq!(cache.get("carbon"), Some(vec!["b1", "b2"]));
        assert_eq!(cache.get("unknown"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = PathCache::new(Duration::from_secs(60));
        cache.set("carbon", vec!["b1"]);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("carbon"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites() {
        let cache = PathCache::new(Duration::from_secs(60));
        cache.set("carbon", vec!["b1"]);
        cache.set("carbon", vec!["b2", "b3"]);

        assert_eq!(cache.get("carbon"), Some(vec!["b2", "b3"]));
    }
}
