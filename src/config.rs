//! Server configuration.
//!
//! All settings come from environment variables with sensible defaults, so a
//! bare `parla` starts a working server. Environment variables:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `HOST` | `0.0.0.0` | Bind address |
//! | `PORT` | `8000` | Bind port |
//! | `SAMPLE_RATE` | `48000` | Expected inbound PCM sample rate (Hz) |
//! | `LANGUAGE` | `de-DE` | Default transcription language |
//! | `DEFAULT_VOICE` | `de-DE-Chirp3-HD-Charon` | Default synthesis voice |
//! | `VAD_ENERGY_THRESHOLD` | `0.01` | RMS threshold for the energy classifier |
//! | `VAD_MIN_VOICE_FRAMES` | `3` | Voiced frames to confirm speech |
//! | `VAD_MIN_SILENCE_FRAMES` | `5` | Silent frames before a flush |
//! | `VAD_SILENCE_THRESHOLD_MS` | `500` | Silence duration before a flush |
//! | `VAD_MIN_SPEECH_DURATION_MS` | `250` | Minimum utterance length |
//! | `VAD_PRE_ROLL_FRAMES` | `50` | Frames kept ahead of speech onset |
//! | `CHUNKER_MAX_CHARS` | `80` | Buffer limit of the synthesis chunker |
//! | `HISTORY_LIMIT` | `10` | Rolling conversation window per session |
//! | `RETRIEVAL_LIMIT` | `5` | Context documents per prompt |

use std::env;

use crate::core::chunker::ChunkerConfig;
use crate::core::vad::VadConfig;

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Sample rate the session expects inbound frames to use (Hz).
    pub sample_rate: u32,
    /// Default language code for transcription.
    pub language: String,
    /// Default voice for synthesis when the client names none.
    pub default_voice: String,

    /// RMS threshold of the energy-based voice classifier.
    pub vad_energy_threshold: f32,
    pub vad: VadConfig,
    pub chunker: ChunkerConfig,

    /// Entries kept in the per-session conversation history.
    pub history_limit: usize,
    /// Context documents retrieved per turn.
    pub retrieval_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            sample_rate: 48000,
            language: "de-DE".to_string(),
            default_voice: "de-DE-Chirp3-HD-Charon".to_string(),
            vad_energy_threshold: 0.01,
            vad: VadConfig::default(),
            chunker: ChunkerConfig::default(),
            history_limit: 10,
            retrieval_limit: 5,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// # Errors
    /// Returns an error when a set variable fails to parse or a value is out
    /// of range.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let config = Self {
            host: env_string("HOST", defaults.host),
            port: env_parse("PORT", defaults.port)?,
            sample_rate: env_parse("SAMPLE_RATE", defaults.sample_rate)?,
            language: env_string("LANGUAGE", defaults.language),
            default_voice: env_string("DEFAULT_VOICE", defaults.default_voice),
            vad_energy_threshold: env_parse("VAD_ENERGY_THRESHOLD", defaults.vad_energy_threshold)?,
            vad: VadConfig::default()
                .with_min_voice_frames(env_parse(
                    "VAD_MIN_VOICE_FRAMES",
                    defaults.vad.min_voice_frames,
                )?)
                .with_min_silence_frames(env_parse(
                    "VAD_MIN_SILENCE_FRAMES",
                    defaults.vad.min_silence_frames,
                )?)
                .with_silence_threshold_ms(env_parse(
                    "VAD_SILENCE_THRESHOLD_MS",
                    defaults.vad.silence_threshold_ms,
                )?)
                .with_min_speech_duration_ms(env_parse(
                    "VAD_MIN_SPEECH_DURATION_MS",
                    defaults.vad.min_speech_duration_ms,
                )?)
                .with_pre_roll_frames(env_parse(
                    "VAD_PRE_ROLL_FRAMES",
                    defaults.vad.pre_roll_frames,
                )?),
            chunker: ChunkerConfig::default().with_max_buffered_chars(env_parse(
                "CHUNKER_MAX_CHARS",
                defaults.chunker.max_buffered_chars,
            )?),
            history_limit: env_parse("HISTORY_LIMIT", defaults.history_limit)?,
            retrieval_limit: env_parse("RETRIEVAL_LIMIT", defaults.retrieval_limit)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Bind address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("SAMPLE_RATE must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.vad_energy_threshold) {
            return Err("VAD_ENERGY_THRESHOLD must be within [0.0, 1.0]".to_string());
        }
        if self.chunker.max_buffered_chars == 0 {
            return Err("CHUNKER_MAX_CHARS must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn env_string(key: &str, default: String) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| format!("invalid value for {key}: {value:?}")),
        _ => Ok(default),
    }
}
