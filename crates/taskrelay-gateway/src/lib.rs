//! # TaskRelay Gateway
//!
//! Inbound admission: per-client fixed-window rate limiting, idempotency-key
//! replay, and task creation, exposed as `POST /api/v1/tasks` alongside
//! `GET /health` and `GET /api/v1/stats`.

pub mod admission;
pub mod idempotency;
pub mod rate_limit;
pub mod routes;
pub mod server;

pub use admission::{Admission, AdmissionGateway, AdmissionRequest, AdmissionSnapshot, TaskRequest};
pub use idempotency::{AdmissionRecord, IdempotencyCache};
pub use rate_limit::{RateLimitCounter, RateLimited, RateLimiter};
pub use server::{AppState, build_router, start};
