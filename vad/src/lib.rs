//! Voice activity detection with hysteresis.
//!
//! [`Vad`] turns a stream of raw PCM16 audio frames into a boolean
//! speech-present decision per frame. It holds a fixed-size smoothing
//! window plus two run counters so that a single loud frame can't open an
//! utterance and a single quiet frame can't close one.

use std::collections::VecDeque;

use thiserror::Error;

/// Tunable thresholds for [`Vad`]. The defaults match the reference
/// implementation's energy threshold and frame-count windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS energy above which a frame is raw-classified as speech.
    pub energy_threshold: f32,
    /// Size of the smoothing window used for the majority-vote decision.
    pub window: usize,
    /// Consecutive smoothed-speech frames required before reporting speech.
    pub min_voice_frames: u32,
    /// Consecutive smoothed-silence frames required before reporting silence.
    pub min_silence_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 1000.0,
            window: 5,
            min_voice_frames: 3,
            min_silence_frames: 5,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VadError {
    #[error("frame too short to contain a PCM16 sample: {len} bytes")]
    InvalidFrame { len: usize },
}

/// Per-session voice activity detector.
///
/// Not `Send`/`Sync` by requirement of its contract: exactly one session
/// loop (the socket reader) touches it, so it needs no interior locking.
pub struct Vad {
    config: VadConfig,
    window: VecDeque<bool>,
    voice_run: u32,
    silence_run: u32,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window.max(1)),
            config,
            voice_run: 0,
            silence_run: 0,
        }
    }

    /// Decide whether `frame` (raw little-endian PCM16 samples) contains
    /// speech, updating internal hysteresis state.
    pub fn process(&mut self, frame: &[u8]) -> Result<bool, VadError> {
        if frame.len() < 2 {
            return Err(VadError::InvalidFrame { len: frame.len() });
        }

        let energy = rms_energy(frame);
        let raw = energy > self.config.energy_threshold;

        if self.window.len() == self.config.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(raw);

        let voiced_count = self.window.iter().filter(|v| **v).count();
        let smoothed = voiced_count * 2 > self.window.len();

        if smoothed {
            self.voice_run += 1;
            self.silence_run = 0;
            Ok(self.voice_run >= self.config.min_voice_frames)
        } else {
            self.silence_run += 1;
            self.voice_run = 0;
            Ok(self.silence_run < self.config.min_silence_frames)
        }
    }

    /// Clears the hysteresis counters. The smoothing window is left intact
    /// so the majority vote isn't re-primed from empty on reconnect.
    pub fn reset(&mut self) {
        self.voice_run = 0;
        self.silence_run = 0;
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

fn rms_energy(frame: &[u8]) -> f32 {
    let samples = frame.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]]));
    let mut sum_sq = 0f64;
    let mut n = 0usize;
    for s in samples {
        sum_sq += (s as f64) * (s as f64);
        n += 1;
    }
    if n == 0 {
        return 0.0;
    }
    ((sum_sq / n as f64).sqrt()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_frame(amplitude: i16, samples: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    fn silence_frame(samples: usize) -> Vec<u8> {
        vec![0u8; samples * 2]
    }

    #[test]
    fn invalid_frame_too_short() {
        let mut vad = Vad::new(VadConfig::default());
        let err = vad.process(&[0u8]).unwrap_err();
        assert_eq!(err, VadError::InvalidFrame { len: 1 });
    }

    #[test]
    fn sustained_loud_tone_opens_after_min_voice_frames() {
        let mut vad = Vad::new(VadConfig::default());
        let loud = tone_frame(5000, 160);
        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(vad.process(&loud).unwrap());
        }
        // frames 1-2 below min_voice_frames=3, frame 3 onward report speech
        assert_eq!(results, vec![false, false, true, true]);
    }

    #[test]
    fn single_loud_frame_does_not_open_utterance() {
        let mut vad = Vad::new(VadConfig::default());
        assert!(!vad.process(&tone_frame(5000, 160)).unwrap());
        assert!(!vad.process(&silence_frame(160)).unwrap());
        assert!(!vad.process(&silence_frame(160)).unwrap());
    }

    #[test]
    fn sustained_silence_closes_after_min_silence_frames() {
        let mut vad = Vad::new(VadConfig::default());
        let loud = tone_frame(5000, 160);
        for _ in 0..4 {
            vad.process(&loud).unwrap();
        }
        let mut results = Vec::new();
        for _ in 0..6 {
            results.push(vad.process(&silence_frame(160)).unwrap());
        }
        // min_silence_frames=5: stays "speech" through 4 silent frames, closes on the 5th
        assert_eq!(
            results,
            vec![true, true, true, true, false, false]
        );
    }

    #[test]
    fn reset_clears_counters_but_keeps_window() {
        let mut vad = Vad::new(VadConfig::default());
        let loud = tone_frame(5000, 160);
        for _ in 0..3 {
            vad.process(&loud).unwrap();
        }
        vad.reset();
        // window still has 3 loud frames in it, so a single further loud
        // frame should finish priming the majority-vote window instead of
        // starting from an all-silent window.
        let r = vad.process(&loud).unwrap();
        assert!(!r, "voice_run was reset, so min_voice_frames has not been met yet");
    }

    #[test]
    fn single_quiet_frame_does_not_close_established_utterance() {
        let mut vad = Vad::new(VadConfig::default());
        let loud = tone_frame(5000, 160);
        for _ in 0..4 {
            assert!(vad.process(&loud).is_ok());
        }
        let r = vad.process(&silence_frame(160)).unwrap();
        assert!(r, "a single quiet frame must not immediately close the utterance");
    }
}
