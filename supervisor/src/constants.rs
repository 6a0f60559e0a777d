//! Named timing and count constants for the state machine. Kept out of the
//! loop bodies so the thresholds read as a single table.

use std::time::Duration;

/// An in-progress utterance that has run this long is cut regardless of
/// whether the candidate is still speaking.
pub const MAX_UTTERANCE: Duration = Duration::from_secs(30);

/// The silence ticker only starts counting sustained silence once an
/// utterance has been running at least this long.
pub const MIN_UTTERANCE: Duration = Duration::from_millis(500);

/// Silence ticker period.
pub const TICKER_PERIOD: Duration = Duration::from_millis(100);

/// Consecutive ticks of sustained silence (at `TICKER_PERIOD` each) before
/// the utterance is considered complete; 12 * 100ms ≈ 1.2s.
pub const SILENCE_TICKS_TO_BOUNDARY: u32 = 12;

/// Delay before the first reconnect attempt in a Reconnect Protocol round.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long to wait for the old ASR client's reader to drain after close.
pub const RECONNECT_DRAIN: Duration = Duration::from_millis(500);

/// Reconnect Protocol rounds permitted per utterance before the session is
/// terminated.
pub const MAX_RECONNECT_ROUNDS: u32 = 3;

/// Attempts within a single Reconnect Protocol round's own connect loop,
/// spaced `RECONNECT_ATTEMPT_GAP` apart. Distinct from (and nested inside)
/// the ASR client's own internal connect backoff.
pub const RECONNECT_ATTEMPTS_PER_ROUND: u32 = 3;
pub const RECONNECT_ATTEMPT_GAP: Duration = Duration::from_millis(500);
