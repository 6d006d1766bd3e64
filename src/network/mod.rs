//! Network Layer
//!
//! HTTP boundary for auditors: a read-only verify server and the matching
//! client. Game logic stays in `game/`; this layer only moves records.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ClientError, VerifyClient};
pub use protocol::{ErrorBody, ErrorCode, GameIdParam, HealthResponse, VerifyPayload, VerifyRequest};
pub use server::{router, ServerConfig, ServerError, VerifyServer};
