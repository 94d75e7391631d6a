use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    #[error("failed to run {stage} process: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("STT error: {0}")]
    Stt(String),

    #[error("no speech recognized")]
    NoSpeech,

    #[error("TTS error: {0}")]
    Tts(String),
}
