use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("speech recognition failed: {0}")]
    Recognition(String),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub voice: String,
    pub rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "default".to_string(),
            rate: 150,
        }
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn recognize(&self, audio: &[u8], encoding_hint: &str) -> Result<String, SpeechError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, SpeechError>;
}

/// Stand-in voice channel for when no real recognizer/synthesizer is wired
/// up. Recognition cycles through a small set of canned scheduling phrases;
/// synthesis produces a tagged byte buffer that satisfies the transport
/// contract without real audio.
pub struct SimulatedVoice {
    canned: Vec<String>,
    cursor: AtomicUsize,
}

impl SimulatedVoice {
    pub fn new() -> Self {
        Self {
            canned: vec![
                "明天上午十点到十一点开会".to_string(),
                "今天下午两点到四点技术评审".to_string(),
                "schedule a project sync tomorrow at 2pm for 1 hour".to_string(),
                "book a client visit next friday 3pm to 5pm".to_string(),
            ],
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_phrases(canned: Vec<String>) -> Self {
        Self {
            canned,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for SimulatedVoice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechToText for SimulatedVoice {
    async fn recognize(&self, audio: &[u8], _encoding_hint: &str) -> Result<String, SpeechError> {
        if audio.is_empty() {
            return Err(SpeechError::Recognition("empty audio buffer".to_string()));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.canned.len();
        let text = self.canned[index].clone();
        info!(%text, "simulated recognition");
        Ok(text)
    }
}

#[async_trait]
impl TextToSpeech for SimulatedVoice {
    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<Vec<u8>, SpeechError> {
        let mut audio = b"RIFFSIM\0".to_vec();
        audio.extend_from_slice(text.as_bytes());
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_audio_is_a_recognition_error() {
        let voice = SimulatedVoice::new();
        let err = voice.recognize(&[], "wav").await.unwrap_err();
        assert!(matches!(err, SpeechError::Recognition(_)));
    }

    #[tokio::test]
    async fn recognition_cycles_canned_phrases() {
        let voice = SimulatedVoice::with_phrases(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(voice.recognize(&[1], "wav").await.unwrap(), "a");
        assert_eq!(voice.recognize(&[1], "wav").await.unwrap(), "b");
        assert_eq!(voice.recognize(&[1], "wav").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn synthesis_embeds_the_text() {
        let voice = SimulatedVoice::new();
        let audio = voice
            .synthesize("event added", &VoiceConfig::default())
            .await
            .unwrap();
        assert!(audio.starts_with(b"RIFF"));
        assert!(audio.ends_with(b"event added"));
    }
}
