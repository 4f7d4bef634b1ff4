mod crypto;
mod metrics;

pub use self::crypto::{Aead, RandomInit, Rng};
pub use self::metrics::{CacheMetrics, HitRateMetrics, NoMetrics, ReqType};
