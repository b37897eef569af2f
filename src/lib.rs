//! Turnstile - Rate Limiting Admission Control
//!
//! This crate implements per-identity admission control for request-serving
//! systems. A limiter answers one question, "may this identity proceed right
//! now?", using either a rolling fixed-window counter or a token bucket.
//! Stale identity state is purged by a cancellable background evictor, and an
//! axum middleware turns rejections into `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
