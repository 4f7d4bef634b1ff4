//! Node cache metrics.
//!
//! Measures how many hash tree nodes each request needs and how many of
//! them had to be loaded into the node cache, i.e. the cache hit rate.
//!
//! # Usage Example
//!
//! ```
//! let metrics = Arc::new(HitRateMetrics::new());
//! let mut controller = HashTreeController::with_metrics(cache, tree, root_hash, metrics.clone())?;
//! controller.sign_read_block(0, session, &nonce)?;
//! metrics.display();
//! ```
use crate::layers::merkle::NodeId;
use crate::os::{HashMap, Mutex};

/// Two request types for measuring node cache hits.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ReqType {
    Read,
    Write,
}

/// Receives cache events from `HashTreeController`.
///
/// All methods default to no-ops so an implementation only overrides what
/// it records.
pub trait CacheMetrics: Send + Sync {
    /// One request completed; it needed `nodes_needed` tree nodes in the
    /// cache, `nodes_loaded` of which were not there yet.
    fn on_request(&self, _req_type: ReqType, _nodes_needed: usize, _nodes_loaded: usize) {}

    /// A cached node was evicted to make room.
    fn on_evict(&self, _victim: NodeId) {}
}

/// Metrics sink that records nothing.
#[derive(Debug, Default)]
pub struct NoMetrics;

impl CacheMetrics for NoMetrics {}

/// Accumulated node counts of one request type.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct NodeHits {
    pub requests: usize,
    pub needed: usize,
    pub loaded: usize,
}

impl NodeHits {
    /// Fraction of needed nodes found in the cache.
    pub fn hit_rate(&self) -> f64 {
        if self.needed == 0 {
            return f64::NAN;
        }
        1.0 - self.loaded as f64 / self.needed as f64
    }
}

/// Counts node cache hits and evictions.
#[derive(Debug)]
pub struct HitRateMetrics {
    inner: Mutex<HitRateInner>,
}

#[derive(Debug)]
struct HitRateInner {
    table: HashMap<ReqType, NodeHits>,
    evictions: usize,
}

impl HitRateMetrics {
    pub fn new() -> Self {
        let table = [
            (ReqType::Read, NodeHits::default()),
            (ReqType::Write, NodeHits::default()),
        ]
        .into_iter()
        .collect();
        Self {
            inner: Mutex::new(HitRateInner {
                table,
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, req_type: ReqType) -> NodeHits {
        self.inner
            .lock()
            .table
            .get(&req_type)
            .copied()
            .unwrap_or_default()
    }

    pub fn evictions(&self) -> usize {
        self.inner.lock().evictions
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner
            .table
            .values_mut()
            .for_each(|hits| *hits = NodeHits::default());
        inner.evictions = 0;
    }

    pub fn display(&self) {
        println!("===== Node Cache Metrics =====");
        let inner = self.inner.lock();
        let mut req_types: Vec<_> = inner.table.keys().copied().collect();
        req_types.sort();
        for req_type in req_types {
            let hits = inner.table[&req_type];
            println!(
                "{:?}: {} requests, {} nodes needed, {} loaded (hit rate {:.2}%)",
                req_type,
                hits.requests,
                hits.needed,
                hits.loaded,
                hits.hit_rate() * 100.0
            );
        }
        println!("Evictions: {}", inner.evictions);
        println!("===== Node Cache Metrics =====");
    }
}

impl Default for HitRateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics for HitRateMetrics {
    fn on_request(&self, req_type: ReqType, nodes_needed: usize, nodes_loaded: usize) {
        let mut inner = self.inner.lock();
        let hits = inner.table.entry(req_type).or_default();
        hits.requests += 1;
        hits.needed += nodes_needed;
        hits.loaded += nodes_loaded;
    }

    fn on_evict(&self, _victim: NodeId) {
        self.inner.lock().evictions += 1;
    }
}
