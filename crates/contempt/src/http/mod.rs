//! REST client: disguise headers, per-bucket rate limiting, retries and
//! message history paging.

mod client;
mod history;
mod ratelimit;
mod route;

pub use client::{HttpClient, HttpConfig, MessageQuery, MAX_MESSAGE_LIMIT};
pub use history::{MessageHistory, DEFAULT_PAGE_SIZE};
pub use ratelimit::{RateLimitInfo, RateLimiter, DEFAULT_RETRY_AFTER};
pub use route::Route;
