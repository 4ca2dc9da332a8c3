//! HTTP query layer
//!
//! Read-only access to channels and schedules plus a small administration
//! surface over the running scheduler.

pub mod routes;
pub mod server;

pub use routes::create_router;
pub use server::{ApiServer, AppState, ServerError};
