//! Streaming voice activity detection with hysteresis and pre-roll capture.
//!
//! The detector consumes one audio frame per call and drives a two-state
//! machine:
//!
//! ```text
//! [Idle] ── N consecutive voiced frames ──► [Speaking]
//!    ▲                                          │
//!    │   M consecutive silent frames            │
//!    │   AND silence ≥ silence_threshold_ms     │
//!    └──────────────────────────────────────────┘
//!        voiced span ≥ min_speech_duration_ms → segment flushed
//!        voiced span <  min_speech_duration_ms → segment discarded
//! ```
//!
//! While idle the detector keeps a bounded ring of recent frames; when speech
//! is confirmed that ring becomes the segment's pre-roll so the utterance
//! onset is not clipped. Durations are measured in stream time (accumulated
//! frame lengths), so detection behaves identically regardless of how fast
//! frames arrive.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::audio::{AudioFrame, SpeechSegment};
use crate::core::providers::VoiceClassifier;

use super::config::VadConfig;

/// Outcome of processing one frame.
#[derive(Debug)]
pub enum VadVerdict {
    /// Nothing to hand off yet; the detector is accumulating state.
    Buffering,
    /// A complete utterance was detected; the buffered segment is handed
    /// over exactly once.
    Flush(SpeechSegment),
}

impl VadVerdict {
    pub fn is_flush(&self) -> bool {
        matches!(self, VadVerdict::Flush(_))
    }
}

/// Frame-by-frame voice activity detector.
///
/// Single-writer: one instance belongs to one session task and requires no
/// locking. Classification is delegated to a [`VoiceClassifier`]; a failing
/// classification is treated as silence so a flaky classifier can never
/// corrupt detector state.
pub struct VoiceActivityDetector {
    config: VadConfig,
    classifier: Arc<dyn VoiceClassifier>,

    /// Buffered frames: a bounded pre-roll ring while idle, the growing
    /// segment while speaking.
    buffer: VecDeque<AudioFrame>,
    speaking: bool,
    consecutive_voice: u32,
    consecutive_silence: u32,

    /// Accumulated stream time at the end of the last processed frame (ms).
    stream_pos_ms: u64,
    /// Stream position when speech was confirmed (ms).
    first_voice_ms: u64,
    /// Stream position of the most recent voiced frame (ms).
    last_voice_ms: u64,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig, classifier: Arc<dyn VoiceClassifier>) -> Self {
        Self {
            config,
            classifier,
            buffer: VecDeque::with_capacity(config.pre_roll_frames + 1),
            speaking: false,
            consecutive_voice: 0,
            consecutive_silence: 0,
            stream_pos_ms: 0,
            first_voice_ms: 0,
            last_voice_ms: 0,
        }
    }

    /// Process a single frame and report whether a finished segment should
    /// be handed downstream.
    pub fn process(&mut self, frame: AudioFrame) -> VadVerdict {
        let frame_ms = frame.duration_ms();
        self.stream_pos_ms += frame_ms;

        let has_voice = match self.classifier.classify(&frame) {
            Ok(v) => v,
            Err(e) => {
                // Treat an unclassifiable frame as silence; the counters
                // keep advancing and the detector stays consistent.
                warn!(error = %e, "voice classification failed, treating frame as silence");
                false
            }
        };

        self.buffer.push_back(frame);
        if !self.speaking {
            while self.buffer.len() > self.config.pre_roll_frames {
                self.buffer.pop_front();
            }
        }

        if has_voice {
            self.on_voiced_frame()
        } else {
            self.on_silent_frame()
        }
    }

    fn on_voiced_frame(&mut self) -> VadVerdict {
        self.consecutive_voice += 1;
        self.consecutive_silence = 0;
        self.last_voice_ms = self.stream_pos_ms;

        if !self.speaking && self.consecutive_voice >= self.config.min_voice_frames {
            self.speaking = true;
            self.first_voice_ms = self.stream_pos_ms;
            info!(
                pre_roll_frames = self.buffer.len(),
                stream_pos_ms = self.stream_pos_ms,
                "voice activity started"
            );
        }

        VadVerdict::Buffering
    }

    fn on_silent_frame(&mut self) -> VadVerdict {
        self.consecutive_silence += 1;
        self.consecutive_voice = 0;

        if !self.speaking {
            return VadVerdict::Buffering;
        }

        let silence_ms = self.stream_pos_ms.saturating_sub(self.last_voice_ms);
        if self.consecutive_silence < self.config.min_silence_frames
            || silence_ms < self.config.silence_threshold_ms
        {
            return VadVerdict::Buffering;
        }

        let speech_ms = self.last_voice_ms.saturating_sub(self.first_voice_ms);
        if speech_ms >= self.config.min_speech_duration_ms && !self.buffer.is_empty() {
            info!(
                speech_ms = speech_ms,
                silence_ms = silence_ms,
                "voice activity ended, flushing segment"
            );
            let segment = self.take_segment(speech_ms);
            VadVerdict::Flush(segment)
        } else {
            debug!(speech_ms = speech_ms, "speech burst too short, discarding");
            self.reset_segment_state();
            VadVerdict::Buffering
        }
    }

    /// Flush whatever is buffered, if it amounts to a valid utterance.
    ///
    /// Called on session teardown when the frame stream ends without a
    /// closing silence. Idempotent: a second call after a flush returns
    /// `None`.
    pub fn force_flush(&mut self) -> Option<SpeechSegment> {
        if self.speaking && !self.buffer.is_empty() {
            let speech_ms = self.stream_pos_ms.saturating_sub(self.first_voice_ms);
            if speech_ms >= self.config.min_speech_duration_ms {
                info!(speech_ms = speech_ms, "force-flushing final segment");
                return Some(self.take_segment(speech_ms));
            }
            debug!(speech_ms = speech_ms, "final buffer too short, discarding");
        }
        self.reset_segment_state();
        None
    }

    /// Reset all detector state, including the stream clock.
    pub fn reset(&mut self) {
        self.reset_segment_state();
        self.stream_pos_ms = 0;
        self.first_voice_ms = 0;
        self.last_voice_ms = 0;
        debug!("voice activity detector reset");
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Number of frames currently buffered (pre-roll while idle).
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    fn take_segment(&mut self, speech_ms: u64) -> SpeechSegment {
        let sample_rate = self
            .buffer
            .front()
            .map(|f| f.sample_rate)
            .unwrap_or_default();
        let total: usize = self.buffer.iter().map(|f| f.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in self.buffer.drain(..) {
            samples.extend_from_slice(&frame.samples);
        }
        self.reset_segment_state();
        SpeechSegment {
            samples,
            sample_rate,
            speech_duration_ms: speech_ms,
        }
    }

    fn reset_segment_state(&mut self) {
        self.buffer.clear();
        self.speaking = false;
        self.consecutive_voice = 0;
        self.consecutive_silence = 0;
    }
}
