pub mod api;
pub mod rate_limiter;


pub use api::{FeedCursor, RedditApiClient};
pub use rate_limiter::{RateLimitConfig, RateLimitPermit, RateLimitStatus, RateLimiter};
