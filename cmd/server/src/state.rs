use std::sync::Arc;

use interview_asr::AsrBackend;
use interview_registry::Registry;
use interview_supervisor::Sinks;

/// Shared application state, cloned into every handler. Grounded on the
/// teacher axum adapter's single `AppState` facade threaded through
/// `with_state`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub backend: Arc<dyn AsrBackend>,
    pub sinks: Sinks,
    pub public_ws_base: String,
}
