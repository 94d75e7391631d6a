//! Speech collaborators for the talkback upload workflow.
//!
//! Both directions shell out to locally installed tools: the recognizer
//! turns an uploaded recording into text before it is relayed to the
//! operator, and the synthesizer renders the operator's reply to an audio
//! file the browser can play. Each invocation is bounded by a timeout and
//! the child process is killed when the timeout fires.

pub mod config;
pub mod error;
pub mod stt;
pub mod tts;

pub use config::VoiceConfig;
pub use error::VoiceError;
pub use stt::SttService;
pub use tts::TtsService;
