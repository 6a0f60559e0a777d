use thiserror::Error;

/// The two `StateError` variants from the attach/close admission rules,
/// surfaced by the HTTP layer as 409/404 respectively.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session already has an attached socket")]
    AlreadyConnected,
    #[error("session not found")]
    NotFound,
}
