//! HTTP surface of the hub
//!
//! - Validator WebSocket transport and coordinator stats
//! - Payout API (balance, challenge, withdraw)
//! - Monitor target management
//! - Security middleware (auth, body size, headers, request logging)

pub mod coordinator;
pub mod middleware;
pub mod payout;
pub mod targets;

pub use coordinator::{CoordinatorApiState, create_router as create_coordinator_router};
pub use middleware::{
    SecurityMiddlewareConfig, SecurityState, auth_middleware, body_size_middleware, client_ip,
    logging_middleware, security_headers_middleware,
};
pub use payout::{PayoutApiState, create_router as create_payout_router};
pub use targets::{TargetApiError, TargetApiState, create_router as create_target_router};
