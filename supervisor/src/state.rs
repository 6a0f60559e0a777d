//! Supervisor-local run state: the bookkeeping the three loops share that
//! isn't part of the Session Record itself (timers, run counters). Guarded
//! by its own mutex, distinct from the session's, since it's never
//! consulted by anything outside this crate.

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InUtterance,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryCause {
    MaxDuration,
    Silence,
}

pub struct RunState {
    pub phase: Phase,
    pub utterance_start: Option<Instant>,
    pub last_voice: Option<Instant>,
    pub silence_ticks: u32,
    pub reconnect_attempts: u32,
    /// Set after a successful reconnect; cleared (along with
    /// `reconnect_attempts`) on the next voiced frame that is forwarded
    /// successfully.
    pub reset_reconnect_on_next_voice: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            utterance_start: None,
            last_voice: None,
            silence_ticks: 0,
            reconnect_attempts: 0,
            reset_reconnect_on_next_voice: false,
        }
    }
}

impl RunState {
    /// `IDLE -> IN_UTTERANCE` on the first voiced frame of a new utterance.
    /// Returns whether this frame opened a new utterance.
    pub fn begin_utterance_if_idle(&mut self, now: Instant) -> bool {
        if self.phase == Phase::Idle {
            self.phase = Phase::InUtterance;
            self.utterance_start = Some(now);
            self.last_voice = Some(now);
            self.silence_ticks = 0;
            self.reconnect_attempts = 0;
            true
        } else {
            false
        }
    }

    /// Marks the run `CLOSING` (spec.md §4.4) once termination has begun,
    /// regardless of which phase it interrupts.
    pub fn mark_closing(&mut self) {
        self.phase = Phase::Closing;
    }

    pub fn note_voice(&mut self, now: Instant) {
        self.last_voice = Some(now);
        self.silence_ticks = 0;
        if self.reset_reconnect_on_next_voice {
            self.reconnect_attempts = 0;
            self.reset_reconnect_on_next_voice = false;
        }
    }

    /// Checks the max-utterance cutoff; if exceeded, closes the utterance
    /// (without touching the ASR connection) and returns the boundary.
    pub fn check_max_duration(&mut self, now: Instant) -> Option<BoundaryCause> {
        if self.phase != Phase::InUtterance {
            return None;
        }
        let start = self.utterance_start?;
        if now.duration_since(start) > crate::constants::MAX_UTTERANCE {
            self.phase = Phase::Idle;
            Some(BoundaryCause::MaxDuration)
        } else {
            None
        }
    }

    /// One silence-ticker tick; returns `Some(boundary)` once sustained
    /// silence crosses the threshold.
    pub fn tick_silence(&mut self, now: Instant) -> Option<BoundaryCause> {
        if self.phase != Phase::InUtterance {
            return None;
        }
        let (Some(start), Some(last_voice)) = (self.utterance_start, self.last_voice) else {
            return None;
        };
        if now.duration_since(start) <= crate::constants::MIN_UTTERANCE {
            return None;
        }
        if now.duration_since(last_voice) < crate::constants::TICKER_PERIOD {
            return None;
        }
        self.silence_ticks += 1;
        if self.silence_ticks >= crate::constants::SILENCE_TICKS_TO_BOUNDARY {
            self.phase = Phase::Idle;
            Some(BoundaryCause::Silence)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn begin_utterance_only_transitions_from_idle() {
        tokio::time::pause();
        let mut rs = RunState::default();
        let now = Instant::now();
        assert!(rs.begin_utterance_if_idle(now));
        assert_eq!(rs.phase, Phase::InUtterance);
        assert!(!rs.begin_utterance_if_idle(now));
    }

    #[tokio::test]
    async fn reconnect_attempts_reset_at_utterance_start() {
        tokio::time::pause();
        let mut rs = RunState::default();
        rs.reconnect_attempts = 2;
        rs.begin_utterance_if_idle(Instant::now());
        assert_eq!(rs.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn max_duration_boundary_fires_past_30s() {
        tokio::time::pause();
        let mut rs = RunState::default();
        let t0 = Instant::now();
        rs.begin_utterance_if_idle(t0);
        tokio::time::advance(Duration::from_secs(31)).await;
        let boundary = rs.check_max_duration(Instant::now());
        assert_eq!(boundary, Some(BoundaryCause::MaxDuration));
        assert_eq!(rs.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn silence_boundary_needs_twelve_ticks_past_min_utterance() {
        tokio::time::pause();
        let mut rs = RunState::default();
        let t0 = Instant::now();
        rs.begin_utterance_if_idle(t0);
        tokio::time::advance(Duration::from_millis(600)).await;
        rs.last_voice = Some(Instant::now() - Duration::from_millis(600));

        let mut boundary = None;
        for _ in 0..12 {
            tokio::time::advance(Duration::from_millis(100)).await;
            boundary = rs.tick_silence(Instant::now());
        }
        assert_eq!(boundary, Some(BoundaryCause::Silence));
    }

    #[tokio::test]
    async fn silence_ticker_never_fires_before_min_utterance_elapsed() {
        tokio::time::pause();
        let mut rs = RunState::default();
        rs.begin_utterance_if_idle(Instant::now());
        let boundary = rs.tick_silence(Instant::now());
        assert_eq!(boundary, None);
    }
}
