//! Rate limiting logic and state management.

mod backend;
mod clock;
mod evictor;
mod fixed_window;
mod policy;
mod table;
mod token_bucket;

pub use backend::RateLimiter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use evictor::{Evictor, EvictorHandle};
pub use fixed_window::{FixedWindowLimiter, WindowState};
pub use policy::LimiterPolicy;
pub use table::{ClientState, IdentityTable, DEFAULT_SHARDS};
pub use token_bucket::{BucketState, RefillPolicy, TokenBucketLimiter};
