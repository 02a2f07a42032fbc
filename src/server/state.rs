use std::sync::Arc;

use crate::session::SessionManager;

/// Shared application state
///
/// The session manager is an explicit instance owned by the composition
/// root and handed to request handlers by reference; there is no ambient
/// process-wide manager.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}
