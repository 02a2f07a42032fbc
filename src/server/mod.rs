//! HTTP surface
//!
//! A thin translation layer over the session manager: request bodies map to
//! manager calls, manager errors map to status codes. No independent logic.

pub mod handlers;
pub mod state;

pub use handlers::{create_router, CreateServerRequest, DeleteServerRequest, ServerResponse};
pub use state::AppState;
