//! HTTP API surface.
//!
//! This module owns request parsing, authentication, input validation, and
//! response envelopes. Profile state lives in [`ProfileStore`] and
//! [`ActiveProfile`]; recognition is delegated to a [`RecognitionGateway`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::audio::{normalize_upload, validate_extension, NormalizedAudio};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::gateway::{RecognitionGateway, RecognitionRequest};
use crate::language::Language;
use crate::profile::{
    validate_profile_name, validate_region, validate_stored_name, ActiveProfile, BackendProfile,
    ProfileError, ProfileStore,
};
use crate::response::{Envelope, TranscriptionData, TranslationData};

/// Human-readable service name returned by health endpoints.
pub const APP_NAME: &str = "speech-babelon-server";
/// Service version string returned by health endpoints.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    /// Stored credential profiles.
    pub profiles: Arc<ProfileStore>,
    /// The profile used for recognition requests.
    pub active: Arc<ActiveProfile>,
    /// Remote recognition service.
    pub gateway: Arc<dyn RecognitionGateway>,
    /// Phrase hints sent with every recognition request.
    pub dictionary: RwLock<Vec<String>>,
}

impl AppState {
    /// Constructs shared handler state.
    pub fn new(
        cfg: AppConfig,
        profiles: Arc<ProfileStore>,
        active: Arc<ActiveProfile>,
        gateway: Arc<dyn RecognitionGateway>,
    ) -> Self {
        Self {
            cfg,
            profiles,
            active,
            gateway,
            dictionary: RwLock::new(Vec::new()),
        }
    }

    /// Dictionary entries followed by the segment's preceding text.
    fn phrase_hints(&self, prev_text: Option<String>) -> Vec<String> {
        let mut phrases = self
            .dictionary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        phrases.extend(prev_text);
        phrases
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, AppError>;

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.cfg.max_upload_bytes;
    Router::new()
        .route("/", get(root))
        .route("/health", get(root))
        .route("/check_available_models", get(check_available_models))
        .route("/check_current_model", get(check_current_model))
        .route("/change_custom_model", post(change_custom_model))
        .route("/upload_custom_model", post(upload_custom_model))
        .route("/update_dictionary", post(update_dictionary))
        .route("/transcription", post(transcription))
        .route("/translate", post(translate))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Service status (`GET /`, `GET /health`).
pub async fn root(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Value> {
    require_auth(&state.cfg, &headers)?;
    let active = current_name(&state).await.ok();
    Ok(Json(Envelope::ok(
        "service is running",
        json!({
            "name": APP_NAME,
            "version": APP_VERSION,
            "active_profile": active,
        }),
    )))
}

/// Lists stored profile names (`GET /check_available_models`).
pub async fn check_available_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Vec<String>> {
    require_auth(&state.cfg, &headers)?;
    let profiles = Arc::clone(&state.profiles);
    let names = run_blocking(move || profiles.list()).await?;
    info!(count = names.len(), "listed available profiles");
    Ok(Json(Envelope::ok(
        format!("Available models: {}", names.join(", ")),
        names,
    )))
}

/// Reports the active profile name (`GET /check_current_model`).
pub async fn check_current_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<String> {
    require_auth(&state.cfg, &headers)?;
    let name = current_name(&state).await?;
    Ok(Json(Envelope::ok(format!("Current model: {name}"), name)))
}

/// Switches the active profile (`POST /change_custom_model`).
pub async fn change_custom_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<String> {
    require_auth(&state.cfg, &headers)?;
    let mut fields = read_text_fields(&mut multipart).await?;
    let name = required_field(&mut fields, "name")?;
    validate_stored_name(&name).map_err(|msg| AppError::invalid_request(msg, Some("name")))?;

    let profile = {
        let profiles = Arc::clone(&state.profiles);
        let name = name.clone();
        run_blocking(move || profiles.get(&name)).await?
    };

    if state.cfg.verify_profiles {
        state.gateway.verify(&profile).await.map_err(|err| {
            warn!(
                profile = %name,
                error = %err,
                "profile credentials rejected; keeping current selection"
            );
            err
        })?;
    }

    let active = Arc::clone(&state.active);
    let target = name.clone();
    run_blocking(move || active.switch_to(&target)).await?;

    Ok(Json(Envelope::ok(
        format!("Custom model changed to {name:?} successfully."),
        name,
    )))
}

/// Stores or replaces a profile (`POST /upload_custom_model`).
pub async fn upload_custom_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<String> {
    require_auth(&state.cfg, &headers)?;
    let mut fields = read_text_fields(&mut multipart).await?;

    let name = required_field(&mut fields, "name")?;
    validate_profile_name(&name).map_err(|msg| AppError::invalid_request(msg, Some("name")))?;
    let subscription_key = required_field(&mut fields, "SubscriptionKey")?;
    let service_region = required_field(&mut fields, "ServiceRegion")?.to_ascii_lowercase();
    validate_region(&service_region)
        .map_err(|msg| AppError::invalid_request(msg, Some("ServiceRegion")))?;
    let endpoint_id = fields.remove("EndpointId").filter(|v| !v.is_empty());

    let profile = BackendProfile {
        name: name.clone(),
        subscription_key,
        service_region,
        endpoint_id,
    };

    if state.cfg.verify_profiles {
        state.gateway.verify(&profile).await.map_err(|err| {
            warn!(
                profile = %name,
                error = %err,
                "profile credentials rejected; upload not stored"
            );
            err
        })?;
    }

    let profiles = Arc::clone(&state.profiles);
    let stored = profile.clone();
    run_blocking(move || profiles.put(&stored)).await?;
    info!(
        profile = %profile.name,
        region = %profile.service_region,
        custom_endpoint = profile.endpoint_id.is_some(),
        "stored profile"
    );

    Ok(Json(Envelope::ok(
        format!("Custom model config {name:?} saved successfully."),
        name,
    )))
}

/// Replaces the phrase-hint dictionary (`POST /update_dictionary`).
///
/// `dictionary` is a comma-separated list; blank input clears it.
pub async fn update_dictionary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Vec<String>> {
    require_auth(&state.cfg, &headers)?;
    let mut fields = read_text_fields(&mut multipart).await?;
    let raw = fields.remove("dictionary").ok_or_else(|| {
        AppError::invalid_request(
            "missing required multipart field: dictionary",
            Some("dictionary"),
        )
    })?;
    let words = parse_dictionary(&raw);

    *state
        .dictionary
        .write()
        .unwrap_or_else(PoisonError::into_inner) = words.clone();

    let message = if words.is_empty() {
        info!("dictionary cleared");
        "Dictionary has been cleared.".to_string()
    } else {
        info!(entries = words.len(), words = ?words, "dictionary updated");
        format!("Dictionary updated with {} entries.", words.len())
    };
    Ok(Json(Envelope::ok(message, words)))
}

fn parse_dictionary(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Transcribes an audio segment with the active profile (`POST /transcription`).
pub async fn transcription(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<TranscriptionData> {
    require_auth(&state.cfg, &headers)?;
    let form = parse_audio_form(&mut multipart).await?;
    let language = form.o_lang.as_deref().map(Language::parse).transpose()?;
    let profile = resolve_active_profile(&state).await?;
    let audio = normalize(form.bytes, form.extension).await?;

    let request = RecognitionRequest {
        wav: audio.wav,
        duration_secs: audio.duration_secs,
        language,
        phrases: state.phrase_hints(form.prev_text),
    };
    let result = state
        .gateway
        .transcribe(&profile, request)
        .await
        .map_err(|err| {
            warn!(
                device_id = %form.meeting.device_id,
                audio_uid = %form.meeting.audio_uid,
                profile = %profile.name,
                error = %err,
                "transcription failed"
            );
            err
        })?;

    let transcribe_time = result.elapsed.as_secs_f64();
    let detected = result.language.map_or("unknown", Language::code);
    info!(
        device_id = %form.meeting.device_id,
        audio_uid = %form.meeting.audio_uid,
        profile = %profile.name,
        language = detected,
        transcribe_time,
        rtf = result.rtf,
        text = %result.text,
        "transcription completed"
    );

    let message = format!("{detected}: {}", result.text);
    let meeting = form.meeting;
    Ok(Json(Envelope::ok(
        message,
        TranscriptionData {
            meeting_id: meeting.meeting_id,
            device_id: meeting.device_id,
            ori_lang: form.o_lang.unwrap_or_default().to_ascii_lowercase(),
            transcription_text: result.text,
            times: meeting.times,
            audio_uid: meeting.audio_uid,
            transcribe_time,
        },
    )))
}

/// Transcribes and translates an audio segment (`POST /translate`).
pub async fn translate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<TranslationData> {
    require_auth(&state.cfg, &headers)?;
    let form = parse_audio_form(&mut multipart).await?;
    let language = match form.o_lang.as_deref() {
        Some(raw) => Language::parse(raw)?,
        None => Language::DEFAULT,
    };
    let profile = resolve_active_profile(&state).await?;
    let audio = normalize(form.bytes, form.extension).await?;

    let request = RecognitionRequest {
        wav: audio.wav,
        duration_secs: audio.duration_secs,
        language: Some(language),
        phrases: state.phrase_hints(form.prev_text),
    };
    let result = state
        .gateway
        .translate(&profile, request)
        .await
        .map_err(|err| {
            warn!(
                device_id = %form.meeting.device_id,
                audio_uid = %form.meeting.audio_uid,
                profile = %profile.name,
                error = %err,
                "translation failed"
            );
            err
        })?;

    let translate_time = result.elapsed.as_secs_f64();
    let message = Language::ALL
        .iter()
        .map(|lang| {
            let text = result.texts.get(lang.code()).map_or("", String::as_str);
            format!("{}: {text}", lang.code().to_ascii_uppercase())
        })
        .collect::<Vec<_>>()
        .join(" | ");
    info!(
        device_id = %form.meeting.device_id,
        audio_uid = %form.meeting.audio_uid,
        profile = %profile.name,
        ori_lang = language.code(),
        translate_time,
        rtf = result.rtf,
        source_text = %result.source_text,
        "translation completed"
    );

    let meeting = form.meeting;
    Ok(Json(Envelope::ok(
        message,
        TranslationData {
            meeting_id: meeting.meeting_id,
            device_id: meeting.device_id,
            ori_lang: language.code().to_string(),
            translate_text: result.texts,
            times: meeting.times,
            audio_uid: meeting.audio_uid,
            translate_time,
        },
    )))
}

/// Identifiers echoed back in recognition responses.
struct SegmentMeta {
    meeting_id: String,
    device_id: String,
    audio_uid: String,
    times: String,
}

struct AudioForm {
    extension: String,
    bytes: Vec<u8>,
    meeting: SegmentMeta,
    o_lang: Option<String>,
    prev_text: Option<String>,
}

/// Parses and validates multipart form fields for the recognition routes.
async fn parse_audio_form(multipart: &mut Multipart) -> Result<AudioForm, AppError> {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut text = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };

        if name == "file" {
            let filename = field.file_name().map(ToOwned::to_owned);
            let bytes = field.bytes().await.map_err(|err| {
                AppError::bad_multipart(format!("failed to read file bytes: {err}"))
            })?;
            file = Some((filename, bytes.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|err| AppError::bad_multipart(format!("invalid {name} field: {err}")))?;
        text.insert(name, value.trim().to_string());
    }

    let (filename, bytes) = file.ok_or_else(|| {
        AppError::invalid_request("missing required multipart field: file", Some("file"))
    })?;
    let extension = validate_extension(filename.as_deref())?;
    if bytes.is_empty() {
        return Err(AppError::invalid_request(
            "uploaded file is empty",
            Some("file"),
        ));
    }

    let times = required_field(&mut text, "times")?;
    let meeting = SegmentMeta {
        meeting_id: text.remove("meeting_id").unwrap_or_default(),
        device_id: text.remove("device_id").unwrap_or_default(),
        audio_uid: text.remove("audio_uid").unwrap_or_default(),
        times,
    };

    Ok(AudioForm {
        extension,
        bytes,
        meeting,
        o_lang: text.remove("o_lang").filter(|v| !v.is_empty()),
        prev_text: text.remove("prev_text").filter(|v| !v.is_empty()),
    })
}

/// Collects the text fields of a form, ignoring file parts.
async fn read_text_fields(multipart: &mut Multipart) -> Result<HashMap<String, String>, AppError> {
    let mut fields = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };
        if field.file_name().is_some() {
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|err| AppError::bad_multipart(format!("invalid {name} field: {err}")))?;
        fields.insert(name, value.trim().to_string());
    }
    Ok(fields)
}

fn required_field(fields: &mut HashMap<String, String>, name: &str) -> Result<String, AppError> {
    fields
        .remove(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::invalid_request(
                format!("missing required multipart field: {name}"),
                Some(name),
            )
        })
}

async fn current_name(state: &AppState) -> Result<String, AppError> {
    let active = Arc::clone(&state.active);
    run_blocking(move || active.current()).await
}

async fn resolve_active_profile(state: &AppState) -> Result<BackendProfile, AppError> {
    let active = Arc::clone(&state.active);
    run_blocking(move || active.current_profile())
        .await
        .map_err(|err| {
            if let AppError::Profile(ProfileError::NotFound(name)) = &err {
                warn!(profile = %name, "active profile no longer exists");
            }
            err
        })
}

async fn normalize(bytes: Vec<u8>, extension: String) -> Result<NormalizedAudio, AppError> {
    tokio::task::spawn_blocking(move || normalize_upload(&bytes, &extension))
        .await
        .map_err(|err| AppError::internal(format!("audio decode task failed: {err}")))?
}

/// Runs registry filesystem work off the async executor.
async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, ProfileError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::internal(format!("profile task failed: {err}")))?
        .map_err(AppError::from)
}

/// Enforces optional bearer-token authentication.
fn require_auth(cfg: &AppConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected_api_key) = cfg.api_key.as_deref() else {
        return Ok(());
    };

    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid authorization header"))?;

    let mut parts = value.split_whitespace();
    let (Some(scheme), Some(token), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::unauthorized("missing bearer token"));
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized("missing bearer token"));
    }
    if token != expected_api_key {
        return Err(AppError::unauthorized("invalid token"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::error::AppError;
    use crate::gateway::{RecognitionGateway, RecognitionRequest, Transcription, Translation};
    use crate::language::{empty_translations, Language};
    use crate::profile::{ActiveProfile, BackendProfile, ProfileStore};

    use super::{build_router, AppState};

    const BOUNDARY: &str = "X-BOUNDARY";

    #[derive(Default)]
    struct MockGateway {
        seen_phrases: Mutex<Vec<String>>,
        seen_language: Mutex<Option<Option<Language>>>,
    }

    #[async_trait]
    impl RecognitionGateway for MockGateway {
        async fn transcribe(
            &self,
            profile: &BackendProfile,
            req: RecognitionRequest,
        ) -> Result<Transcription, AppError> {
            if profile.subscription_key == "gateway-down" {
                return Err(AppError::gateway("Network connection issue or invalid region"));
            }
            *self.seen_phrases.lock().unwrap() = req.phrases;
            *self.seen_language.lock().unwrap() = Some(req.language);
            Ok(Transcription {
                text: format!("hello from {}", profile.name),
                // Stands in for detection when no language is requested.
                language: Some(req.language.unwrap_or(Language::De)),
                elapsed: Duration::from_millis(250),
                rtf: 0.5,
            })
        }

        async fn translate(
            &self,
            profile: &BackendProfile,
            req: RecognitionRequest,
        ) -> Result<Translation, AppError> {
            *self.seen_phrases.lock().unwrap() = req.phrases;
            let source = req.language.unwrap_or(Language::DEFAULT);
            let mut texts = empty_translations();
            texts.insert(source.code().to_string(), "source".to_string());
            texts.insert("en".to_string(), format!("english via {}", profile.name));
            Ok(Translation {
                source_text: "source".to_string(),
                texts,
                elapsed: Duration::from_millis(400),
                rtf: 0.8,
            })
        }

        async fn verify(&self, profile: &BackendProfile) -> Result<(), AppError> {
            if profile.subscription_key == "bad-key" {
                return Err(AppError::gateway("Invalid subscription key"));
            }
            Ok(())
        }
    }

    struct TestApp {
        _dir: TempDir,
        router: axum::Router,
        gateway: Arc<MockGateway>,
        store: Arc<ProfileStore>,
    }

    fn test_cfg(dir: &TempDir, api_key: Option<&str>) -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_key: api_key.map(ToOwned::to_owned),
            profile_dir: dir.path().to_path_buf(),
            active_profile_file: dir.path().join(".active_profile"),
            default_profile: None,
            bootstrap_profile_file: None,
            verify_profiles: true,
            gateway_timeout_secs: 5,
            max_upload_bytes: 4 * 1024 * 1024,
            speech_endpoint: "https://speech.invalid".to_string(),
            short_audio_endpoint: "https://stt.invalid".to_string(),
            translator_endpoint: "https://translator.invalid".to_string(),
        }
    }

    fn app(api_key: Option<&str>) -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_cfg(&dir, api_key);
        let store = Arc::new(ProfileStore::open(&cfg.profile_dir).expect("store"));
        let active = Arc::new(
            ActiveProfile::open(Arc::clone(&store), &cfg.active_profile_file).expect("active"),
        );
        let gateway = Arc::new(MockGateway::default());
        let state = Arc::new(AppState::new(
            cfg,
            Arc::clone(&store),
            active,
            gateway.clone(),
        ));
        TestApp {
            _dir: dir,
            router: build_router(state),
            gateway,
            store,
        }
    }

    fn wav_bytes() -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("writer");
            for i in 0..8_000 {
                writer
                    .write_sample(((i % 80) as i16 - 40) * 300)
                    .expect("sample");
            }
            writer.finalize().expect("finalize");
        }
        cursor.into_inner()
    }

    fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("request")
    }

    async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.router.clone().oneshot(req).await.expect("response");
        let status = res.status();
        let bytes = to_bytes(res.into_body(), 1024 * 1024)
            .await
            .expect("body bytes");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    async fn upload(app: &TestApp, name: &str, key: &str) -> (StatusCode, Value) {
        send(
            app,
            post(
                "/upload_custom_model",
                multipart_body(
                    &[
                        ("name", name),
                        ("SubscriptionKey", key),
                        ("ServiceRegion", "eastus"),
                        ("EndpointId", ""),
                    ],
                    None,
                ),
            ),
        )
        .await
    }

    async fn switch(app: &TestApp, name: &str) -> (StatusCode, Value) {
        send(
            app,
            post(
                "/change_custom_model",
                multipart_body(&[("name", name)], None),
            ),
        )
        .await
    }

    fn segment_fields<'a>(extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut fields = vec![
            ("meeting_id", "m-1"),
            ("device_id", "d-1"),
            ("audio_uid", "a-1"),
            ("times", "2024-05-01T10:00:00"),
        ];
        fields.extend_from_slice(extra);
        fields
    }

    #[tokio::test]
    async fn requires_auth_when_api_key_set() {
        let app = app(Some("secret"));

        let (status, payload) = send(&app, get("/check_available_models")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(payload["status"], "FAILED");

        let req = Request::builder()
            .uri("/check_available_models")
            .header("Authorization", "bearer secret")
            .body(Body::empty())
            .expect("request");
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn uploaded_profiles_are_listed() {
        let app = app(None);
        assert_eq!(upload(&app, "modelB", "k2").await.0, StatusCode::OK);
        assert_eq!(upload(&app, "modelA", "k1").await.0, StatusCode::OK);

        let (status, payload) = send(&app, get("/check_available_models")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "OK");
        assert_eq!(payload["data"], serde_json::json!(["modelA", "modelB"]));

        let stored = app.store.get("modelA").expect("stored");
        assert_eq!(stored.endpoint_id, None);
    }

    #[tokio::test]
    async fn upload_with_rejected_credentials_is_not_stored() {
        let app = app(None);
        let (status, payload) = upload(&app, "modelA", "bad-key").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(payload["message"], "Invalid subscription key");
        assert!(app.store.list().expect("list").is_empty());
    }

    #[tokio::test]
    async fn upload_validates_fields() {
        let app = app(None);
        let (status, payload) = upload(&app, "../escape", "k").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["data"]["param"], "name");

        let (status, payload) = send(
            &app,
            post(
                "/upload_custom_model",
                multipart_body(&[("name", "modelA"), ("ServiceRegion", "eastus")], None),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["data"]["param"], "SubscriptionKey");
    }

    #[tokio::test]
    async fn current_model_is_unset_until_switch() {
        let app = app(None);
        let (status, payload) = send(&app, get("/check_current_model")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(payload["status"], "FAILED");

        upload(&app, "modelA", "k").await;
        let (status, _) = switch(&app, "modelA").await;
        assert_eq!(status, StatusCode::OK);

        let (status, payload) = send(&app, get("/check_current_model")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"], "modelA");
    }

    #[tokio::test]
    async fn switch_to_unknown_profile_keeps_selection() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;

        let (status, _) = switch(&app, "nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, payload) = send(&app, get("/check_current_model")).await;
        assert_eq!(payload["data"], "modelA");
    }

    #[tokio::test]
    async fn switch_with_rejected_credentials_keeps_selection() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;
        app.store
            .put(&BackendProfile {
                name: "revoked".to_string(),
                subscription_key: "bad-key".to_string(),
                service_region: "eastus".to_string(),
                endpoint_id: None,
            })
            .expect("put");

        let (status, _) = switch(&app, "revoked").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (_, payload) = send(&app, get("/check_current_model")).await;
        assert_eq!(payload["data"], "modelA");
    }

    #[tokio::test]
    async fn transcription_without_active_profile_fails() {
        let app = app(None);
        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/transcription",
                multipart_body(&segment_fields(&[]), Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(payload["status"], "FAILED");
    }

    #[tokio::test]
    async fn transcription_uses_active_profile() {
        let app = app(None);
        upload(&app, "modelA", "k1").await;
        upload(&app, "modelB", "k2").await;
        switch(&app, "modelB").await;

        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/transcription",
                multipart_body(
                    &segment_fields(&[("o_lang", "EN"), ("prev_text", "earlier words")]),
                    Some(("seg.wav", wav.as_slice())),
                ),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], "OK");
        assert_eq!(payload["data"]["transcription_text"], "hello from modelB");
        assert_eq!(payload["data"]["ori_lang"], "en");
        assert_eq!(payload["data"]["device_id"], "d-1");
        assert_eq!(payload["data"]["times"], "2024-05-01T10:00:00");
        assert_eq!(payload["data"]["transcribe_time"], 0.25);
        assert_eq!(payload["message"], "en: hello from modelB");
        assert_eq!(
            *app.gateway.seen_phrases.lock().unwrap(),
            vec!["earlier words".to_string()]
        );
    }

    #[tokio::test]
    async fn transcription_without_language_reports_detected_one() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;

        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/transcription",
                multipart_body(&segment_fields(&[]), Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(*app.gateway.seen_language.lock().unwrap(), Some(None));
        assert_eq!(payload["message"], "de: hello from modelA");
        assert_eq!(payload["data"]["ori_lang"], "");
    }

    #[tokio::test]
    async fn dictionary_and_prior_text_reach_the_gateway() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;

        let (status, payload) = send(
            &app,
            post(
                "/update_dictionary",
                multipart_body(&[("dictionary", " AUO, ADP ,, OLED ")], None),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"], serde_json::json!(["AUO", "ADP", "OLED"]));
        assert_eq!(payload["message"], "Dictionary updated with 3 entries.");

        let wav = wav_bytes();
        let (status, _) = send(
            &app,
            post(
                "/translate",
                multipart_body(
                    &segment_fields(&[("prev_text", "earlier words")]),
                    Some(("seg.wav", wav.as_slice())),
                ),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            *app.gateway.seen_phrases.lock().unwrap(),
            vec!["AUO", "ADP", "OLED", "earlier words"]
        );

        let (status, payload) = send(
            &app,
            post(
                "/update_dictionary",
                multipart_body(&[("dictionary", "  ")], None),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"], serde_json::json!([]));
        assert_eq!(payload["message"], "Dictionary has been cleared.");

        send(
            &app,
            post(
                "/transcription",
                multipart_body(&segment_fields(&[]), Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;
        assert!(app.gateway.seen_phrases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_dictionary_requires_field() {
        let app = app(None);
        let (status, payload) = send(
            &app,
            post("/update_dictionary", multipart_body(&[("words", "a,b")], None)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["data"]["param"], "dictionary");
    }

    #[tokio::test]
    async fn listed_legacy_profile_can_be_selected() {
        let app = app(None);
        std::fs::write(
            app.store.root().join("Azure Speech.json"),
            r#"{"name": "Azure Speech", "SubscriptionKey": "k", "ServiceRegion": "eastasia"}"#,
        )
        .expect("write legacy record");

        let (_, payload) = send(&app, get("/check_available_models")).await;
        assert_eq!(payload["data"], serde_json::json!(["Azure Speech"]));

        let (status, payload) = switch(&app, "Azure Speech").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"], "Azure Speech");

        let (_, payload) = send(&app, get("/")).await;
        assert_eq!(payload["data"]["active_profile"], "Azure Speech");

        let (status, payload) = switch(&app, "../Azure Speech").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["data"]["param"], "name");
    }

    #[tokio::test]
    async fn transcription_rejects_unsupported_language() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;

        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/transcription",
                multipart_body(&segment_fields(&[("o_lang", "ja")]), Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["data"]["param"], "o_lang");
    }

    #[tokio::test]
    async fn transcription_requires_times() {
        let app = app(None);
        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/transcription",
                multipart_body(&[("device_id", "d-1")], Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["data"]["param"], "times");
    }

    #[tokio::test]
    async fn transcription_surfaces_gateway_errors() {
        let app = app(None);
        app.store
            .put(&BackendProfile {
                name: "flaky".to_string(),
                subscription_key: "gateway-down".to_string(),
                service_region: "eastus".to_string(),
                endpoint_id: None,
            })
            .expect("put");
        switch(&app, "flaky").await;

        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/transcription",
                multipart_body(&segment_fields(&[]), Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(payload["status"], "FAILED");
    }

    #[tokio::test]
    async fn translate_defaults_to_chinese_source() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;

        let wav = wav_bytes();
        let (status, payload) = send(
            &app,
            post(
                "/translate",
                multipart_body(&segment_fields(&[]), Some(("seg.wav", wav.as_slice()))),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["data"]["ori_lang"], "zh");
        assert_eq!(payload["data"]["translate_text"]["zh"], "source");
        assert_eq!(payload["data"]["translate_text"]["en"], "english via modelA");
        assert_eq!(payload["data"]["translate_text"]["de"], "");
        assert_eq!(payload["data"]["translate_time"], 0.4);
        assert_eq!(
            payload["message"],
            "ZH: source | EN: english via modelA | DE: "
        );
    }

    #[tokio::test]
    async fn recognition_rejects_unsupported_upload_type() {
        let app = app(None);
        upload(&app, "modelA", "k").await;
        switch(&app, "modelA").await;

        let (status, _) = send(
            &app,
            post(
                "/transcription",
                multipart_body(&segment_fields(&[]), Some(("clip.mp4", &b"not-a-real-media"[..]))),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
