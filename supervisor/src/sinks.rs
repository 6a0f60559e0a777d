//! Downstream hand-off points.
//!
//! spec.md treats the LLM "context brain" and the TTS synthesizer as
//! out-of-scope external collaborators reached only through a sink
//! interface. [`Sinks`] is that interface made concrete: two unbounded
//! channels the server binary drains on the other end. The supervisor
//! itself never inspects what a completed utterance or boundary signal is
//! used for.

use tokio::sync::mpsc::UnboundedSender;

use crate::state::BoundaryCause;

/// A completed utterance (`kind = turn`, non-empty text) handed to the
/// downstream analyzer per spec.md §4.4 step (iv).
#[derive(Debug, Clone)]
pub struct CompletedUtterance {
    pub session_id: String,
    pub text: String,
    pub turn_id: Option<String>,
}

/// An utterance boundary signal — fired on both max-duration and
/// sustained-silence boundaries (see [`crate::state::BoundaryCause`]).
#[derive(Debug, Clone)]
pub struct UtteranceBoundary {
    pub session_id: String,
    pub cause: BoundaryCause,
}

/// The supervisor's two downstream hand-offs. Cloned cheaply (both fields
/// are `UnboundedSender`s) so each session's supervisor can hold its own
/// copy pointed at the server's shared receivers.
#[derive(Clone)]
pub struct Sinks {
    pub utterance_tx: UnboundedSender<CompletedUtterance>,
    pub boundary_tx: UnboundedSender<UtteranceBoundary>,
}
