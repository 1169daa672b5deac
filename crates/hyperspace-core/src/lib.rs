pub mod config;
pub mod error;
pub mod record;

pub use config::GlobalConfig;
pub use error::CoreError;
pub use record::{FilterExpr, FilterOp, Record};

/// Seam between `IndexFactory`'s FILTER persistence and the storage
/// node's scalar KV store. Kept as a trait so `hyperspace-index` never
/// depends on the concrete `ScalarStorage` type in `hyperspace-node`.
pub trait ScalarKv: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()>;
    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
}

/// Vectors are stored and compared as 32-bit floats.
pub type Component = f32;

/// Process-wide distance metric, chosen at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    L2,
    InnerProduct,
}

impl DistanceMetric {
    pub fn distance(self, a: &[Component], b: &[Component]) -> f32 {
        match self {
            DistanceMetric::L2 => l2_distance(a, b),
            DistanceMetric::InnerProduct => inner_product_distance(a, b),
        }
    }

    /// Ordering direction for this metric's distance values: ascending for
    /// L2 (smaller is closer), descending for inner product (larger is
    /// closer, so we sort by the negated value and keep one comparator).
    pub fn better(self, a: f32, b: f32) -> bool {
        match self {
            DistanceMetric::L2 => a < b,
            DistanceMetric::InnerProduct => a > b,
        }
    }
}

#[inline]
pub fn l2_distance(a: &[Component], b: &[Component]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn inner_product_distance(a: &[Component], b: &[Component]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Index kind discriminant; the ordinal is load-bearing — it names
/// snapshot files as `<ordinal>.index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum IndexKind {
    Flat = 0,
    Hnsw = 1,
    Filter = 2,
}

impl IndexKind {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_request_str(s: &str) -> Option<Self> {
        match s {
            "FLAT" => Some(IndexKind::Flat),
            "HNSW" => Some(IndexKind::Hnsw),
            _ => None,
        }
    }

    /// Inverse of [`IndexKind::from_request_str`], used when the kind a
    /// request named must be persisted back into the WAL/consensus
    /// payload for replay to recover it.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            IndexKind::Flat => "FLAT",
            IndexKind::Hnsw => "HNSW",
            IndexKind::Filter => "FILTER",
        }
    }
}
