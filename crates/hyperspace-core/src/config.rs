use std::sync::atomic::{AtomicUsize, Ordering};

/// Runtime-mutable HNSW tuning knobs: `ef_search` is read before
/// every search (the graph index calls `setEf(ef_search)` before each
/// search); `ef_construction` and `m` are read at index construction
/// time. Kept as atomics, seeded from the node config, so a future
/// admin endpoint can hot-swap them without restarting the process.
#[derive(Debug)]
pub struct GlobalConfig {
    pub ef_search: AtomicUsize,
    pub ef_construction: AtomicUsize,
    pub m: AtomicUsize,
}

impl GlobalConfig {
    pub fn new(ef_search: usize, ef_construction: usize, m: usize) -> Self {
        Self {
            ef_search: AtomicUsize::new(ef_search),
            ef_construction: AtomicUsize::new(ef_construction),
            m: AtomicUsize::new(m),
        }
    }

    pub fn get_ef_search(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    pub fn set_ef_search(&self, val: usize) {
        self.ef_search.store(val, Ordering::Relaxed);
    }

    pub fn get_ef_construction(&self) -> usize {
        self.ef_construction.load(Ordering::Relaxed)
    }

    pub fn get_m(&self) -> usize {
        self.m.load(Ordering::Relaxed)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::new(100, 200, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ef_search_is_hot_swappable() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.get_ef_search(), 100);
        cfg.set_ef_search(256);
        assert_eq!(cfg.get_ef_search(), 256);
    }
}
