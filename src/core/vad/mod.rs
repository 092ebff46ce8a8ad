//! Voice activity detection.
//!
//! Turns a live stream of PCM frames into speech-boundary decisions and
//! flushed speech segments. Classification of individual frames is delegated
//! to a [`VoiceClassifier`](crate::core::providers::VoiceClassifier)
//! implementation; the state machine here owns hysteresis, pre-roll capture
//! and minimum-duration filtering.

mod config;
mod detector;

pub use config::VadConfig;
pub use detector::{VadVerdict, VoiceActivityDetector};
