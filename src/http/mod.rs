//! HTTP module
//!
//! The request side of a harvest: pacing, one-page fetching and retries.
//!
//! # Features
//!
//! - **Rate Limiting**: FIFO-fair minimum-interval limiter shared per upstream API
//! - **Page Fetching**: One request per page, outcome classified as transient or fatal
//! - **Retries**: Bounded exponential backoff, honouring `Retry-After` on 429

mod client;
mod rate_limit;
mod retry;

pub use client::{
    AuthScheme, Credentials, HttpClientConfig, HttpClientConfigBuilder, HttpPageFetcher,
    PageFetcher,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryController, RetryPolicy};
