use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

fn default_stt_binary() -> PathBuf {
    PathBuf::from("stt")
}

fn default_stt_model() -> String {
    "base".to_string()
}

fn default_stt_timeout_secs() -> u64 {
    60
}

fn default_tts_binary() -> PathBuf {
    PathBuf::from("tts")
}

fn default_tts_timeout_secs() -> u64 {
    30
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("data/audio")
}

/// External speech tooling used by the upload workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Recognizer executable, invoked as `<stt_binary> <audio-path> -m <stt_model>`.
    #[serde(default = "default_stt_binary")]
    pub stt_binary: PathBuf,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_stt_timeout_secs")]
    pub stt_timeout_secs: u64,
    /// Synthesizer executable, invoked as `<tts_binary> <text>`; prints the
    /// path of the audio file it wrote.
    #[serde(default = "default_tts_binary")]
    pub tts_binary: PathBuf,
    #[serde(default = "default_tts_timeout_secs")]
    pub tts_timeout_secs: u64,
    /// Root of the `uploads/` (transient, never served) and `replies/`
    /// (served to authenticated clients) directories.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_binary: default_stt_binary(),
            stt_model: default_stt_model(),
            stt_timeout_secs: default_stt_timeout_secs(),
            tts_binary: default_tts_binary(),
            tts_timeout_secs: default_tts_timeout_secs(),
            audio_dir: default_audio_dir(),
        }
    }
}

impl VoiceConfig {
    pub fn stt_timeout(&self) -> Duration {
        Duration::from_secs(self.stt_timeout_secs)
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs)
    }
}
