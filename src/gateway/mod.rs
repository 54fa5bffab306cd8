//! Recognition gateway abstraction.
//!
//! The HTTP layer depends on the [`RecognitionGateway`] trait rather than a
//! concrete vendor client. Every call receives the resolved profile, so a
//! profile switch takes effect on the next request without rebuilding
//! anything.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::language::Language;
use crate::profile::BackendProfile;

pub mod azure;

/// Audio and hints for one recognition call.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    /// 16 kHz mono PCM16 WAV bytes.
    pub wav: Vec<u8>,
    /// Audio length in seconds, used when the service reports no duration.
    pub duration_secs: f64,
    /// Source language; `None` asks the gateway to detect it among
    /// [`Language::ALL`].
    pub language: Option<Language>,
    /// Phrase hints: the shared dictionary followed by the text preceding
    /// this segment.
    pub phrases: Vec<String>,
}

/// Speech-to-text result.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    /// Language the audio was recognized in; `None` when detection found
    /// no speech to decide on.
    pub language: Option<Language>,
    pub elapsed: Duration,
    /// Processing time divided by audio duration; `0.0` when unknown.
    pub rtf: f64,
}

/// Speech-to-text plus translation result.
#[derive(Debug, Clone)]
pub struct Translation {
    /// Recognized text in the source language.
    pub source_text: String,
    /// Text per language code, including the source language.
    pub texts: BTreeMap<String, String>,
    pub elapsed: Duration,
    pub rtf: f64,
}

/// Contract implemented by remote speech services.
#[async_trait]
pub trait RecognitionGateway: Send + Sync {
    /// Transcribes the audio in its source language.
    async fn transcribe(
        &self,
        profile: &BackendProfile,
        req: RecognitionRequest,
    ) -> Result<Transcription, AppError>;

    /// Transcribes the audio and translates it into every supported language.
    async fn translate(
        &self,
        profile: &BackendProfile,
        req: RecognitionRequest,
    ) -> Result<Translation, AppError>;

    /// Checks that the profile's credentials are accepted by the service.
    async fn verify(&self, profile: &BackendProfile) -> Result<(), AppError>;
}

/// Builds the gateway used by the server.
pub fn build_gateway(cfg: &AppConfig) -> Result<Arc<dyn RecognitionGateway>, AppError> {
    Ok(Arc::new(azure::AzureSpeechGateway::new(cfg)?))
}

/// Real-time factor, preferring the service-reported duration.
pub fn real_time_factor(elapsed: Duration, reported_secs: Option<f64>, fallback_secs: f64) -> f64 {
    let duration = reported_secs
        .filter(|secs| *secs > 0.0)
        .unwrap_or(fallback_secs);
    if duration > 0.0 {
        elapsed.as_secs_f64() / duration
    } else {
        0.0
    }
}
