//! RMS-energy voice classification.
//!
//! A model-free classifier: a frame counts as voiced when its root-mean-
//! square energy exceeds a fixed threshold. Good enough for clean close-mic
//! audio and for driving the VAD in tests and local setups; model-backed
//! classifiers plug in through the same trait.

use crate::core::audio::AudioFrame;

use super::{ProviderError, VoiceClassifier};

/// Energy-threshold [`VoiceClassifier`].
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    /// RMS threshold above which a frame is voiced.
    /// Default: 0.01, suitable for typical speech levels.
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// RMS energy of a sample block.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self { threshold: 0.01 }
    }
}

impl VoiceClassifier for EnergyClassifier {
    fn classify(&self, frame: &AudioFrame) -> Result<bool, ProviderError> {
        if frame.is_empty() {
            return Err(ProviderError::InvalidInput("empty audio frame".into()));
        }
        Ok(Self::rms(&frame.samples) > self.threshold)
    }
}
