//! Languages accepted by the recognition routes and their vendor codes.

use std::collections::BTreeMap;

use crate::error::AppError;

/// A supported source/target language.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Language {
    Zh,
    En,
    De,
}

impl Language {
    /// Every supported language, in response order.
    pub const ALL: [Language; 3] = [Language::Zh, Language::En, Language::De];

    /// Source language used when a request carries no hint.
    pub const DEFAULT: Language = Language::Zh;

    /// Parses a short code such as `"zh"`; case-insensitive.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "zh" => Ok(Self::Zh),
            "en" => Ok(Self::En),
            "de" => Ok(Self::De),
            other => Err(AppError::invalid_request(
                format!(
                    "unsupported o_lang={other:?}; expected one of {}",
                    Self::ALL.map(Self::code).join(",")
                ),
                Some("o_lang"),
            )),
        }
    }

    /// Short code used in requests and responses.
    pub fn code(self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
            Self::De => "de",
        }
    }

    /// Speech recognition locale.
    pub fn locale(self) -> &'static str {
        match self {
            Self::Zh => "zh-TW",
            Self::En => "en-US",
            Self::De => "de-DE",
        }
    }

    /// Code understood by the text translation service.
    pub fn translator_code(self) -> &'static str {
        match self {
            Self::Zh => "zh-Hant",
            Self::En => "en",
            Self::De => "de",
        }
    }

    /// Maps a locale or translator code from a vendor response back to a language.
    pub fn from_vendor_code(code: &str) -> Option<Self> {
        match code {
            "zh-Hant" | "zh-TW" | "zh" => Some(Self::Zh),
            "en" | "en-US" => Some(Self::En),
            "de" | "de-DE" => Some(Self::De),
            _ => None,
        }
    }

    /// Falls back to script detection when the service names no language.
    ///
    /// Only Han script is distinctive enough among the supported languages.
    pub fn guess_from_text(text: &str) -> Option<Self> {
        text.chars()
            .any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
            .then_some(Self::Zh)
    }
}

/// Translation map with an empty entry for every supported language.
pub fn empty_translations() -> BTreeMap<String, String> {
    Language::ALL
        .iter()
        .map(|lang| (lang.code().to_string(), String::new()))
        .collect()
}
