//! Sliding-window rate limiting over two adjacent Redis counters.

mod counter;
mod limiter;
mod middleware;

pub use {
    counter::{MemoryCounter, RateCounter, RedisCounter},
    limiter::RateLimiter,
    middleware::{NAME as MIDDLEWARE_NAME, RateLimitMiddleware},
};
