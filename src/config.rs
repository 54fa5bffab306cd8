//! Configuration loading from environment variables.
//!
//! Values are validated at startup so a misconfigured deployment fails before
//! it accepts traffic.

use std::env;
use std::path::PathBuf;

use crate::error::AppError;

pub const DEFAULT_GATEWAY_TIMEOUT_SECS: usize = 30;
pub const MAX_GATEWAY_TIMEOUT_SECS: usize = 300;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 25;
pub const MAX_UPLOAD_MB: usize = 512;

/// Runtime configuration for the HTTP server, profile registry and gateway.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Optional bearer token required by all endpoints.
    pub api_key: Option<String>,
    /// Directory holding one JSON record per profile.
    pub profile_dir: PathBuf,
    /// Location of the persisted active-profile selection.
    pub active_profile_file: PathBuf,
    /// Profile selected at startup when no selection has been persisted.
    pub default_profile: Option<String>,
    /// Profile record imported into the store at startup.
    pub bootstrap_profile_file: Option<PathBuf>,
    /// Check credentials with the gateway before storing or selecting a profile.
    pub verify_profiles: bool,
    /// Per-request timeout for gateway calls.
    pub gateway_timeout_secs: u64,
    /// Upper bound for request bodies.
    pub max_upload_bytes: usize,
    /// Base URL of the fast transcription service; `{region}` is replaced
    /// with the profile's region.
    pub speech_endpoint: String,
    /// Base URL of the short-audio recognition service used by custom
    /// endpoints; `{region}` is replaced with the profile's region.
    pub short_audio_endpoint: String,
    /// Base URL of the text translation service.
    pub translator_endpoint: String,
}

impl AppConfig {
    /// Builds configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `8000`)
    /// - `API_KEY` (optional)
    /// - `PROFILE_DIR` (default `./profiles`)
    /// - `ACTIVE_PROFILE_FILE` (default `$PROFILE_DIR/.active_profile`)
    /// - `DEFAULT_PROFILE` (optional)
    /// - `BOOTSTRAP_PROFILE_FILE` (optional)
    /// - `VERIFY_PROFILES` (default `true`)
    /// - `GATEWAY_TIMEOUT_SECS` (default `30`, min `1`, max `300`)
    /// - `MAX_UPLOAD_MB` (default `25`, min `1`, max `512`)
    /// - `SPEECH_ENDPOINT` (default `https://{region}.api.cognitive.microsoft.com`)
    /// - `SHORT_AUDIO_ENDPOINT` (default `https://{region}.stt.speech.microsoft.com`)
    /// - `TRANSLATOR_ENDPOINT` (default `https://api.cognitive.microsofttranslator.com`)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 8000)?;
        let profile_dir = PathBuf::from(env_str("PROFILE_DIR", "./profiles"));
        let active_profile_file = env_opt("ACTIVE_PROFILE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| profile_dir.join(".active_profile"));
        let verify_profiles = env_bool("VERIFY_PROFILES", true)?;
        let gateway_timeout_secs = env_usize_bounded(
            "GATEWAY_TIMEOUT_SECS",
            DEFAULT_GATEWAY_TIMEOUT_SECS,
            1,
            MAX_GATEWAY_TIMEOUT_SECS,
        )? as u64;
        let max_upload_mb =
            env_usize_bounded("MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB, 1, MAX_UPLOAD_MB)?;
        let speech_endpoint =
            env_url("SPEECH_ENDPOINT", "https://{region}.api.cognitive.microsoft.com")?;
        let short_audio_endpoint =
            env_url("SHORT_AUDIO_ENDPOINT", "https://{region}.stt.speech.microsoft.com")?;
        let translator_endpoint = env_url(
            "TRANSLATOR_ENDPOINT",
            "https://api.cognitive.microsofttranslator.com",
        )?;

        Ok(Self {
            host,
            port,
            api_key: env_opt("API_KEY"),
            profile_dir,
            active_profile_file,
            default_profile: env_opt("DEFAULT_PROFILE"),
            bootstrap_profile_file: env_opt("BOOTSTRAP_PROFILE_FILE").map(PathBuf::from),
            verify_profiles,
            gateway_timeout_secs,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            speech_endpoint,
            short_audio_endpoint,
            translator_endpoint,
        })
    }
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_url(name: &str, default: &str) -> Result<String, AppError> {
    parse_url(name, &env_str(name, default))
}

fn parse_url(name: &str, raw: &str) -> Result<String, AppError> {
    if !raw.starts_with("https://") && !raw.starts_with("http://") {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected an http(s) URL"
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::internal(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_bool(name: &str, default: bool) -> Result<bool, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_bool(name, &raw)
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected true/false"
        ))),
    }
}

fn env_usize_bounded(
    name: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_usize_bounded(name, &raw, min, max)
}

fn parse_usize_bounded(name: &str, raw: &str, min: usize, max: usize) -> Result<usize, AppError> {
    let parsed = raw.trim().parse::<usize>().ok().filter(|v| (min..=max).contains(v));
    parsed.ok_or_else(|| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_bool, parse_url, parse_usize_bounded};

    #[test]
    fn parse_usize_bounded_accepts_in_range_values() {
        assert_eq!(
            parse_usize_bounded("GATEWAY_TIMEOUT_SECS", "1", 1, 300).unwrap(),
            1
        );
        assert_eq!(
            parse_usize_bounded("GATEWAY_TIMEOUT_SECS", " 300 ", 1, 300).unwrap(),
            300
        );
    }

    #[test]
    fn parse_usize_bounded_rejects_bad_values() {
        assert!(parse_usize_bounded("MAX_UPLOAD_MB", "abc", 1, 512).is_err());
        assert!(parse_usize_bounded("MAX_UPLOAD_MB", "0", 1, 512).is_err());
        assert!(parse_usize_bounded("MAX_UPLOAD_MB", "513", 1, 512).is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("VERIFY_PROFILES", "Yes").unwrap());
        assert!(!parse_bool("VERIFY_PROFILES", "off").unwrap());
        assert!(parse_bool("VERIFY_PROFILES", "maybe").is_err());
    }

    #[test]
    fn parse_url_requires_http_scheme_and_drops_trailing_slash() {
        let template = "https://{region}.api.cognitive.microsoft.com/";
        assert_eq!(
            parse_url("SPEECH_ENDPOINT", template).unwrap(),
            "https://{region}.api.cognitive.microsoft.com"
        );
        assert_eq!(
            parse_url("TRANSLATOR_ENDPOINT", "http://127.0.0.1:9000").unwrap(),
            "http://127.0.0.1:9000"
        );
        assert!(parse_url("SHORT_AUDIO_ENDPOINT", "eastus.stt.speech.microsoft.com").is_err());
    }
}
