//! Azure Speech gateway over the public REST endpoints.
//!
//! Base-model profiles go through the fast transcription API, which takes a
//! list of candidate locales and a phrase list in one multipart request.
//! Profiles with a custom endpoint use the short-audio endpoint with `cid`,
//! because custom models are bound to one locale. Translation recognizes
//! the source text first and then calls the Translator service with the
//! same credentials.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::silent_wav;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::gateway::{
    real_time_factor, RecognitionGateway, RecognitionRequest, Transcription, Translation,
};
use crate::language::{empty_translations, Language};
use crate::profile::BackendProfile;

const TICKS_PER_SECOND: f64 = 10_000_000.0;
const FAST_TRANSCRIPTION_API_VERSION: &str = "2024-11-15";
const CHECK_CLIP_MS: u32 = 100;

/// Base URLs of the Azure services. `{region}` in a speech URL is replaced
/// with the profile's region.
#[derive(Debug, Clone)]
pub struct AzureEndpoints {
    pub speech: String,
    pub short_audio: String,
    pub translator: String,
}

impl AzureEndpoints {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            speech: cfg.speech_endpoint.clone(),
            short_audio: cfg.short_audio_endpoint.clone(),
            translator: cfg.translator_endpoint.clone(),
        }
    }
}

/// Gateway that talks to Azure Speech and Translator.
pub struct AzureSpeechGateway {
    client: reqwest::Client,
    endpoints: AzureEndpoints,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FastDefinition<'a> {
    locales: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phrase_list: Option<PhraseList<'a>>,
}

#[derive(Debug, Serialize)]
struct PhraseList<'a> {
    phrases: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FastResponse {
    #[serde(default)]
    duration_milliseconds: Option<u64>,
    #[serde(default)]
    combined_phrases: Vec<CombinedPhrase>,
    #[serde(default)]
    phrases: Vec<FastPhrase>,
}

#[derive(Debug, Deserialize)]
struct CombinedPhrase {
    text: String,
}

#[derive(Debug, Deserialize)]
struct FastPhrase {
    #[serde(default)]
    locale: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
    /// Audio duration in 100 ns ticks.
    #[serde(default)]
    duration: Option<u64>,
}

#[derive(Debug)]
struct Recognized {
    text: String,
    language: Option<Language>,
    reported_secs: Option<f64>,
}

#[derive(Debug, Serialize)]
struct TranslatorInput<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslatorItem {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    text: String,
    to: String,
}

impl AzureSpeechGateway {
    /// Creates the HTTP client shared by all profiles.
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.gateway_timeout_secs))
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;

        Ok(Self::with_client(client, AzureEndpoints::from_config(cfg)))
    }

    pub fn with_client(client: reqwest::Client, endpoints: AzureEndpoints) -> Self {
        Self { client, endpoints }
    }

    async fn recognize(
        &self,
        profile: &BackendProfile,
        wav: Vec<u8>,
        hint: Option<Language>,
        phrases: &[String],
    ) -> Result<Recognized, AppError> {
        let Some(endpoint_id) = profile.endpoint_id.as_deref() else {
            return self.recognize_fast(profile, wav, hint, phrases).await;
        };

        let language = hint.unwrap_or_else(|| {
            warn!(
                profile = %profile.name,
                "custom endpoints cannot detect the language; assuming {}",
                Language::DEFAULT.code()
            );
            Language::DEFAULT
        });
        if !phrases.is_empty() {
            debug!(
                profile = %profile.name,
                phrases = phrases.len(),
                "custom endpoint recognition takes no phrase hints"
            );
        }
        self.recognize_short_audio(profile, endpoint_id, wav, language)
            .await
    }

    async fn recognize_fast(
        &self,
        profile: &BackendProfile,
        wav: Vec<u8>,
        hint: Option<Language>,
        phrases: &[String],
    ) -> Result<Recognized, AppError> {
        let url = fast_transcription_url(&self.endpoints.speech, &profile.service_region)?;
        let definition = serde_json::to_string(&FastDefinition {
            locales: match hint {
                Some(language) => vec![language.locale()],
                None => Language::ALL.map(Language::locale).to_vec(),
            },
            phrase_list: (!phrases.is_empty()).then_some(PhraseList { phrases }),
        })
        .map_err(|err| AppError::internal(format!("failed to encode definition: {err}")))?;

        let form = multipart::Form::new()
            .part(
                "audio",
                multipart::Part::bytes(wav)
                    .file_name("segment.wav")
                    .mime_str("audio/wav")
                    .map_err(|err| AppError::internal(format!("invalid audio part: {err}")))?,
            )
            .text("definition", definition);

        let response = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &profile.subscription_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|err| request_failure("speech service", &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::gateway(classify_rejection(status, &body)));
        }

        let parsed: FastResponse = response.json().await.map_err(|err| {
            AppError::gateway(format!("failed to parse speech service response: {err}"))
        })?;
        Ok(interpret_fast(parsed, hint, &profile.name))
    }

    async fn recognize_short_audio(
        &self,
        profile: &BackendProfile,
        endpoint_id: &str,
        wav: Vec<u8>,
        language: Language,
    ) -> Result<Recognized, AppError> {
        let url = short_audio_url(
            &self.endpoints.short_audio,
            &profile.service_region,
            endpoint_id,
            language,
        )?;
        let response = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &profile.subscription_key)
            .header(
                reqwest::header::CONTENT_TYPE,
                "audio/wav; codecs=audio/pcm; samplerate=16000",
            )
            .header(reqwest::header::ACCEPT, "application/json")
            .body(wav)
            .send()
            .await
            .map_err(|err| request_failure("speech service", &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::gateway(classify_rejection(status, &body)));
        }

        let parsed: RecognitionResponse = response.json().await.map_err(|err| {
            AppError::gateway(format!("failed to parse speech service response: {err}"))
        })?;
        interpret_recognition(parsed, language, &profile.name)
    }

    async fn translate_text(
        &self,
        profile: &BackendProfile,
        text: &str,
        source: Language,
    ) -> Result<Vec<(Language, String)>, AppError> {
        let targets = Language::ALL
            .into_iter()
            .filter(|lang| *lang != source)
            .collect::<Vec<_>>();
        let url = translator_url(&self.endpoints.translator, source, &targets)?;

        let response = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", &profile.subscription_key)
            .header("Ocp-Apim-Subscription-Region", &profile.service_region)
            .json(&[TranslatorInput { text }])
            .send()
            .await
            .map_err(|err| request_failure("translator service", &err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::gateway(format!(
                "translation failed: {}",
                classify_rejection(status, &body)
            )));
        }

        let items: Vec<TranslatorItem> = response.json().await.map_err(|err| {
            AppError::gateway(format!("failed to parse translator response: {err}"))
        })?;

        Ok(items
            .into_iter()
            .flat_map(|item| item.translations)
            .filter_map(|t| Language::from_vendor_code(&t.to).map(|lang| (lang, t.text)))
            .collect())
    }
}

#[async_trait]
impl RecognitionGateway for AzureSpeechGateway {
    async fn transcribe(
        &self,
        profile: &BackendProfile,
        req: RecognitionRequest,
    ) -> Result<Transcription, AppError> {
        let started = Instant::now();
        let recognized = self
            .recognize(profile, req.wav, req.language, &req.phrases)
            .await?;
        let elapsed = started.elapsed();

        Ok(Transcription {
            text: recognized.text,
            language: recognized.language,
            elapsed,
            rtf: real_time_factor(elapsed, recognized.reported_secs, req.duration_secs),
        })
    }

    async fn translate(
        &self,
        profile: &BackendProfile,
        req: RecognitionRequest,
    ) -> Result<Translation, AppError> {
        let started = Instant::now();
        let source = req.language.unwrap_or(Language::DEFAULT);

        let recognized = self
            .recognize(profile, req.wav, Some(source), &req.phrases)
            .await?;
        let mut texts = empty_translations();
        if !recognized.text.is_empty() {
            texts.insert(source.code().to_string(), recognized.text.clone());
            match self.translate_text(profile, &recognized.text, source).await {
                Ok(pairs) => {
                    for (lang, text) in pairs {
                        texts.insert(lang.code().to_string(), text);
                    }
                }
                Err(err) => warn!(
                    profile = %profile.name,
                    error = %err,
                    "translation failed; returning the recognized text only"
                ),
            }
        }
        let elapsed = started.elapsed();

        Ok(Translation {
            source_text: recognized.text,
            texts,
            elapsed,
            rtf: real_time_factor(elapsed, recognized.reported_secs, req.duration_secs),
        })
    }

    async fn verify(&self, profile: &BackendProfile) -> Result<(), AppError> {
        let clip = silent_wav(CHECK_CLIP_MS)?;
        self.recognize(profile, clip, Some(Language::En), &[])
            .await?;
        debug!(profile = %profile.name, "credentials accepted");
        Ok(())
    }
}

fn regional(template: &str, region: &str) -> String {
    template.replace("{region}", region)
}

fn fast_transcription_url(template: &str, region: &str) -> Result<Url, AppError> {
    let base = regional(template, region);
    Url::parse_with_params(
        &format!("{base}/speechtotext/transcriptions:transcribe"),
        &[("api-version", FAST_TRANSCRIPTION_API_VERSION)],
    )
    .map_err(|err| AppError::gateway(format!("invalid speech endpoint {base:?}: {err}")))
}

fn short_audio_url(
    template: &str,
    region: &str,
    endpoint_id: &str,
    language: Language,
) -> Result<Url, AppError> {
    let base = regional(template, region);
    Url::parse_with_params(
        &format!("{base}/speech/recognition/conversation/cognitiveservices/v1"),
        &[
            ("language", language.locale()),
            ("format", "simple"),
            ("cid", endpoint_id),
        ],
    )
    .map_err(|err| AppError::gateway(format!("invalid speech endpoint {base:?}: {err}")))
}

fn translator_url(endpoint: &str, source: Language, targets: &[Language]) -> Result<Url, AppError> {
    let mut url = Url::parse(&format!("{endpoint}/translate")).map_err(|err| {
        AppError::internal(format!("invalid translator endpoint {endpoint:?}: {err}"))
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("api-version", "3.0");
        query.append_pair("from", source.translator_code());
        for target in targets {
            query.append_pair("to", target.translator_code());
        }
    }
    Ok(url)
}

fn interpret_fast(response: FastResponse, hint: Option<Language>, profile: &str) -> Recognized {
    let text = response
        .combined_phrases
        .iter()
        .map(|phrase| phrase.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        warn!(profile, "no speech could be recognized");
    }

    Recognized {
        language: hint.or_else(|| detect_language(&response.phrases, &text)),
        reported_secs: response
            .duration_milliseconds
            .map(|ms| ms as f64 / 1000.0),
        text,
    }
}

/// Picks the locale that carried the most recognized characters.
fn detect_language(phrases: &[FastPhrase], text: &str) -> Option<Language> {
    let mut weights = [0usize; Language::ALL.len()];
    for phrase in phrases {
        let Some(language) = phrase.locale.as_deref().and_then(Language::from_vendor_code) else {
            continue;
        };
        if let Some(slot) = Language::ALL.iter().position(|lang| *lang == language) {
            weights[slot] += phrase.text.chars().count();
        }
    }

    Language::ALL
        .into_iter()
        .zip(weights)
        .filter(|(_, weight)| *weight > 0)
        .max_by_key(|(_, weight)| *weight)
        .map(|(language, _)| language)
        .or_else(|| Language::guess_from_text(text))
}

fn interpret_recognition(
    response: RecognitionResponse,
    language: Language,
    profile: &str,
) -> Result<Recognized, AppError> {
    let reported_secs = response
        .duration
        .map(|ticks| ticks as f64 / TICKS_PER_SECOND);

    match response.recognition_status.as_str() {
        "Success" => Ok(Recognized {
            text: response.display_text.trim().to_string(),
            language: Some(language),
            reported_secs,
        }),
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => {
            warn!(
                profile,
                status = %response.recognition_status,
                "no speech could be recognized"
            );
            Ok(Recognized {
                text: String::new(),
                language: Some(language),
                reported_secs,
            })
        }
        other => Err(AppError::gateway(format!(
            "speech recognition failed with status {other}"
        ))),
    }
}

fn classify_rejection(status: StatusCode, body: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED => "Invalid subscription key".to_string(),
        StatusCode::FORBIDDEN => "Access denied or quota exceeded".to_string(),
        StatusCode::NOT_FOUND => "Invalid endpoint_id or service region".to_string(),
        StatusCode::TOO_MANY_REQUESTS => "Request rate limit exceeded".to_string(),
        other => {
            let body = body.trim();
            if body.is_empty() {
                format!("Configuration error: HTTP {other}")
            } else {
                format!("Configuration error: HTTP {other}: {body}")
            }
        }
    }
}

fn request_failure(service: &str, err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::gateway(format!("{service} timed out: {err}"))
    } else if err.is_connect() {
        AppError::gateway(format!(
            "Network connection issue or invalid region ({service}): {err}"
        ))
    } else {
        AppError::gateway(format!("{service} request failed: {err}"))
    }
}
