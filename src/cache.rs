use std::time::{Duration, Instant};

/// Single-slot read cache that expires after a fixed time-to-live
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(Instant, T)>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache { ttl, entry: None }
    }

    /// Cached value, if present and younger than the TTL
    pub fn get(&self) -> Option<T> {
        match &self.entry {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&mut self, value: T) {
        self.entry = Some((Instant::now(), value));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_invalidate() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(), None);
        cache.put(vec![1, 2, 3]);
        assert_eq!(cache.get(), Some(vec![1, 2, 3]));
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn zero_ttl_never_hits() {
        let mut cache = TtlCache::new(Duration::ZERO);
        cache.put("x");
        assert_eq!(cache.get(), None);
    }
}
