//! SeoPilot HTTP gateway: the external API over the pool, approval gate, and
//! scheduler.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
