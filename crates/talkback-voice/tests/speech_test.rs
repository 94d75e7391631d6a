#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;
use talkback_voice::{SttService, TtsService, VoiceConfig, VoiceError};

fn recording() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.webm");
    std::fs::write(&path, b"not really audio").unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_stt_returns_trimmed_stdout() {
    let (_dir, path) = recording();
    // `echo` prints its arguments, standing in for a recognizer.
    let stt = SttService::new("echo", "base", Duration::from_secs(5));

    let text = stt.transcribe(&path).await.expect("echo should succeed");
    assert_eq!(text, format!("{} -m base", path.display()));
}

#[tokio::test]
async fn test_stt_silent_output_is_no_speech() {
    let (_dir, path) = recording();
    let stt = SttService::new("true", "base", Duration::from_secs(5));

    match stt.transcribe(&path).await {
        Err(VoiceError::NoSpeech) => {}
        other => panic!("expected NoSpeech, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stt_failing_process_is_reported() {
    let (_dir, path) = recording();
    let stt = SttService::new("false", "base", Duration::from_secs(5));

    match stt.transcribe(&path).await {
        Err(VoiceError::Stt(msg)) => assert!(msg.contains("exited")),
        other => panic!("expected Stt error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stt_missing_binary_fails_to_spawn() {
    let (_dir, path) = recording();
    let stt = SttService::new("/nonexistent/recognizer", "base", Duration::from_secs(5));

    match stt.transcribe(&path).await {
        Err(VoiceError::Spawn { stage, .. }) => assert_eq!(stage, "STT"),
        other => panic!("expected Spawn error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stt_missing_recording() {
    let stt = SttService::new("echo", "base", Duration::from_secs(5));
    let result = stt.transcribe(&PathBuf::from("/nonexistent/clip.webm")).await;
    assert!(matches!(result, Err(VoiceError::Stt(_))));
}

#[tokio::test]
async fn test_tts_returns_reported_path() {
    let tts = TtsService::new("echo", Duration::from_secs(5));
    let path = tts.synthesize("/tmp/reply.mp3").await.expect("echo should succeed");
    assert_eq!(path, PathBuf::from("/tmp/reply.mp3"));
}

#[tokio::test]
async fn test_tts_times_out_and_kills_process() {
    // `sleep 5` outlives a 200ms budget.
    let tts = TtsService::new("sleep", Duration::from_millis(200));

    match tts.synthesize("5").await {
        Err(VoiceError::Timeout { stage, after }) => {
            assert_eq!(stage, "TTS");
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tts_rejects_blank_text() {
    let tts = TtsService::new("echo", Duration::from_secs(5));
    assert!(matches!(tts.synthesize("   ").await, Err(VoiceError::Tts(_))));
}

#[test]
fn test_voice_config_defaults_and_overrides() {
    let config: VoiceConfig = toml::from_str(
        r#"
        stt_binary = "/usr/local/bin/whisper"
        tts_timeout_secs = 5
        "#,
    )
    .unwrap();

    assert_eq!(config.stt_binary, PathBuf::from("/usr/local/bin/whisper"));
    assert_eq!(config.stt_model, "base");
    assert_eq!(config.stt_timeout(), Duration::from_secs(60));
    assert_eq!(config.tts_timeout(), Duration::from_secs(5));
    assert_eq!(config.audio_dir, PathBuf::from("data/audio"));
}
