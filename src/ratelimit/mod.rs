//! Rate limiting algorithms and algorithm selection.

mod algorithm;
mod clock;
mod identity;
mod leaky_bucket;
mod manager;
mod state;
mod token_bucket;

pub use algorithm::{AlgorithmKind, Decision, RateLimitAlgorithm, Status};
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::RateLimitKey;
pub use leaky_bucket::LeakyBucket;
pub use manager::{ActiveLimiter, AlgorithmInfo, LimiterManager};
pub use state::{StateKeys, StoredBucket};
pub use token_bucket::TokenBucket;
