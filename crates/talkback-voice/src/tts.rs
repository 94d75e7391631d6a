use crate::config::VoiceConfig;
use crate::error::VoiceError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Maximum text accepted for synthesis (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Text-to-speech through an external synthesizer process.
///
/// The synthesizer receives the text as its only argument and prints the
/// path of the audio file it produced.
#[derive(Debug, Clone)]
pub struct TtsService {
    binary_path: PathBuf,
    timeout: Duration,
}

impl TtsService {
    pub fn new(binary_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(&config.tts_binary, config.tts_timeout())
    }

    /// Renders `text` to speech and returns the generated file's path.
    pub async fn synthesize(&self, text: &str) -> Result<PathBuf, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::Tts("nothing to synthesize".to_string()));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let child = Command::new(&self.binary_path)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| VoiceError::Spawn {
                stage: "TTS",
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                stage: "TTS",
                after: self.timeout,
            })?
            .map_err(|e| VoiceError::Tts(format!("failed to collect output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!(
                "synthesizer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path.is_empty() {
            return Err(VoiceError::Tts("synthesizer returned empty path".to_string()));
        }

        Ok(PathBuf::from(path))
    }
}
