use crate::config::VoiceConfig;
use crate::error::VoiceError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Maximum recording size accepted for recognition (10 MiB).
const MAX_STT_INPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Speech-to-text through an external recognizer process.
#[derive(Debug, Clone)]
pub struct SttService {
    binary_path: PathBuf,
    model: String,
    timeout: Duration,
}

impl SttService {
    pub fn new(binary_path: impl Into<PathBuf>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(&config.stt_binary, &config.stt_model, config.stt_timeout())
    }

    /// Recognizes the speech in the recording at `audio_path`.
    ///
    /// # Errors
    ///
    /// [`VoiceError::Timeout`] when the recognizer outlives the configured
    /// timeout (the process is killed), [`VoiceError::NoSpeech`] when it
    /// prints nothing, [`VoiceError::Stt`] for oversized input or a failing
    /// exit status.
    pub async fn transcribe(&self, audio_path: &Path) -> Result<String, VoiceError> {
        let size = tokio::fs::metadata(audio_path)
            .await
            .map_err(|e| VoiceError::Stt(format!("cannot read {}: {}", audio_path.display(), e)))?
            .len();
        if size > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio exceeds maximum size: {} bytes (limit: {} bytes)",
                size, MAX_STT_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.binary_path);
        command
            .arg(audio_path)
            .arg("-m")
            .arg(&self.model)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| VoiceError::Spawn {
            stage: "STT",
            source,
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                stage: "STT",
                after: self.timeout,
            })?
            .map_err(|e| VoiceError::Stt(format!("failed to collect output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!(
                "recognizer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(VoiceError::NoSpeech);
        }

        tracing::debug!(path = %audio_path.display(), chars = text.len(), "speech recognized");
        Ok(text)
    }
}
