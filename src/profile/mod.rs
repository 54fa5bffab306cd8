//! Named backend credential profiles and the active-profile switch.
//!
//! [`ProfileStore`] owns the durable name → profile mapping and
//! [`ActiveProfile`] owns the single "in effect right now" pointer. The two
//! are independently atomic: a profile may be replaced or removed between a
//! switch and the next lookup, and readers must tolerate that.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod active;
pub mod store;

pub use active::ActiveProfile;
pub use store::ProfileStore;

/// Failures produced by the profile registry.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile {0:?} does not exist")]
    NotFound(String),
    #[error("no profile has been selected")]
    NoActiveProfile,
    #[error("profile storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl ProfileError {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }
}

/// A named set of Azure Speech credentials.
///
/// The serialized field names match the JSON records written by earlier
/// deployments of this service, so existing profile directories load as-is.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub name: String,
    #[serde(rename = "SubscriptionKey")]
    pub subscription_key: String,
    #[serde(rename = "ServiceRegion")]
    pub service_region: String,
    /// Custom speech model endpoint; `None` uses the base model.
    #[serde(
        rename = "EndpointId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub endpoint_id: Option<String>,
}

/// Seeds the registry at startup.
///
/// Imports `bootstrap_file` (a profile record in the on-disk format) when
/// given, then selects `default_profile`, or the imported profile, if no
/// selection was persisted. A malformed record or a default that does not
/// exist is logged and skipped so the service can still be configured over
/// HTTP. Only an unreadable file or a failing store is fatal.
pub fn bootstrap(
    store: &ProfileStore,
    active: &ActiveProfile,
    bootstrap_file: Option<&Path>,
    default_profile: Option<&str>,
) -> Result<(), ProfileError> {
    let imported = match bootstrap_file {
        Some(path) => import_record(store, path)?,
        None => None,
    };

    if active.current().is_ok() {
        return Ok(());
    }

    let Some(candidate) = default_profile.or(imported.as_deref()) else {
        return Ok(());
    };
    match active.switch_to(candidate) {
        Ok(()) => Ok(()),
        Err(ProfileError::NotFound(name)) => {
            warn!(profile = %name, "default profile does not exist; starting without a selection");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn import_record(store: &ProfileStore, path: &Path) -> Result<Option<String>, ProfileError> {
    let bytes = fs::read(path).map_err(|err| {
        ProfileError::storage(format!("failed to read bootstrap profile {:?}: {err}", path))
    })?;
    let profile: BackendProfile = match serde_json::from_slice(&bytes) {
        Ok(profile) => profile,
        Err(err) => {
            warn!(path = ?path, error = %err, "skipping malformed bootstrap profile");
            return Ok(None);
        }
    };
    if let Err(reason) = validate_stored_name(&profile.name) {
        warn!(path = ?path, %reason, "skipping bootstrap profile with an unusable name");
        return Ok(None);
    }
    store.put(&profile)?;
    info!(profile = %profile.name, path = ?path, "imported bootstrap profile");
    Ok(Some(profile.name))
}

/// Checks that a name can address a record file without leaving the
/// profile directory.
///
/// This is the rule every name returned by [`ProfileStore::list`] already
/// satisfies, including records written before [`validate_profile_name`]
/// existed, so it is what selecting an existing profile requires.
pub fn validate_stored_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("profile name must not be empty".to_string());
    }
    if name.starts_with('.') {
        return Err(format!("profile name {name:?} must not start with '.'"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!(
            "profile name {name:?} must not contain path separators"
        ));
    }
    Ok(())
}

/// Checks a name for a newly uploaded profile.
///
/// Stricter than [`validate_stored_name`]: new names are kept to a portable
/// file-stem alphabet.
pub fn validate_profile_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("profile name must not be empty".to_string());
    }
    if name.len() > 128 {
        return Err(format!(
            "profile name {name:?} is too long; expected at most 128 characters"
        ));
    }
    if name.starts_with('.') {
        return Err(format!("profile name {name:?} must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!(
            "profile name {name:?} may only contain ASCII letters, digits, '-', '_' and '.'"
        ));
    }
    Ok(())
}

/// Checks that a region looks like an Azure region identifier (`eastus`, `westeurope2`).
///
/// The region becomes part of the gateway hostname, so anything else is rejected.
pub fn validate_region(region: &str) -> Result<(), String> {
    if region.is_empty() {
        return Err("ServiceRegion must not be empty".to_string());
    }
    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(format!(
            "invalid ServiceRegion={region:?}; expected a lowercase Azure region such as eastus"
        ));
    }
    Ok(())
}
