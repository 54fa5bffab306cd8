//! Uniform response envelope and the payloads carried inside it.

use std::collections::BTreeMap;

use serde::Serialize;

/// Outcome marker carried by every response body.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAILED")]
    Failed,
}

/// `{"status", "message", "data"}` wrapper returned by every route.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: Status,
    pub message: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
            data,
        }
    }

    pub fn failed(message: impl Into<String>, data: T) -> Self {
        Self {
            status: Status::Failed,
            message: message.into(),
            data,
        }
    }
}

/// Result payload of `POST /transcription`.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionData {
    pub meeting_id: String,
    pub device_id: String,
    pub ori_lang: String,
    pub transcription_text: String,
    pub times: String,
    pub audio_uid: String,
    /// Seconds spent in the recognition service.
    pub transcribe_time: f64,
}

/// Result payload of `POST /translate`.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationData {
    pub meeting_id: String,
    pub device_id: String,
    pub ori_lang: String,
    /// Text per supported language code; languages without output map to `""`.
    pub translate_text: BTreeMap<String, String>,
    pub times: String,
    pub audio_uid: String,
    /// Seconds spent in the recognition and translation services.
    pub translate_time: f64,
}
