// Application state shared across all modules

use std::sync::Arc;

use super::config::AuthConfig;
use crate::auth::SessionOrchestrator;

/// Built once in `main` and shared read-only through an `Extension` layer
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub session: Arc<SessionOrchestrator>,
}
