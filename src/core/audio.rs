//! Audio frame and speech segment types shared across the pipeline.

use std::time::Instant;

/// A fixed-format block of mono PCM samples.
///
/// Samples are f32 normalized to [-1.0, 1.0]. Frames are ephemeral: the VAD
/// owns a frame for the duration of one detection cycle, after which it is
/// either dropped or absorbed into a [`SpeechSegment`] buffer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Wall-clock arrival time, for logging and turn metadata.
    pub received_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            received_at: Instant::now(),
        }
    }

    /// Decode a little-endian i16 PCM byte buffer into a frame.
    ///
    /// A trailing odd byte is ignored.
    pub fn from_pcm16_bytes(data: &[u8], sample_rate: u32) -> Self {
        let samples = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Duration of this frame in milliseconds of stream time.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An ordered concatenation of frames collected between a detected
/// speech-start and speech-end, including the pre-roll captured before
/// speech was confirmed.
///
/// Created by the VAD, consumed once by the orchestrator.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Concatenated mono samples, pre-roll first.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Voiced duration (first voiced frame to last voiced frame), in ms.
    pub speech_duration_ms: u64,
}

impl SpeechSegment {
    /// Total buffered duration in milliseconds (pre-roll and trailing
    /// silence included).
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
