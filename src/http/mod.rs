//! HTTP surface: admission middleware, handlers and server.

mod handlers;
mod identity;
mod middleware;
mod server;

pub use handlers::{AppState, CheckRequest, CheckResponse, ErrorResponse, StatsResponse};
pub use identity::{IdentityResolver, IdentitySource, UNKNOWN_IDENTITY};
pub use middleware::{rate_limit, too_many_requests};
pub use server::{router, HttpServer};
