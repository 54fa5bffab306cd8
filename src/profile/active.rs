//! The active-profile pointer used by every recognition request.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::store::write_atomically;
use super::{BackendProfile, ProfileError, ProfileStore};

#[derive(Debug, Serialize, Deserialize)]
struct SelectionRecord {
    current_name: String,
}

/// Tracks which stored profile is currently in effect.
///
/// The selection refers to a profile by name only. It is persisted to its own
/// record so it survives restarts, independently of the profile records.
#[derive(Debug)]
pub struct ActiveProfile {
    store: Arc<ProfileStore>,
    selection_path: PathBuf,
    /// Serializes switches so the record and `current` change in the same order.
    switching: Mutex<()>,
    current: RwLock<Option<String>>,
}

impl ActiveProfile {
    /// Loads the persisted selection from `selection_path`, if any.
    ///
    /// A selection whose profile no longer exists is kept as-is; lookups
    /// through [`ActiveProfile::current_profile`] report it as `NotFound`.
    pub fn open(
        store: Arc<ProfileStore>,
        selection_path: impl Into<PathBuf>,
    ) -> Result<Self, ProfileError> {
        let selection_path = selection_path.into();
        let current = match fs::read(&selection_path) {
            Ok(bytes) => {
                let record: SelectionRecord = serde_json::from_slice(&bytes).map_err(|err| {
                    ProfileError::storage(format!(
                        "corrupt selection record {:?}: {err}",
                        selection_path
                    ))
                })?;
                Some(record.current_name)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(ProfileError::storage(format!(
                    "failed to read selection record {:?}: {err}",
                    selection_path
                )));
            }
        };

        Ok(Self {
            store,
            selection_path,
            switching: Mutex::new(()),
            current: RwLock::new(current),
        })
    }

    /// Makes `name` the active profile.
    ///
    /// Fails with `NotFound` when no such profile is stored; the previous
    /// selection is left untouched on any failure. Readers only wait for the
    /// in-memory swap, never for the record write.
    pub fn switch_to(&self, name: &str) -> Result<(), ProfileError> {
        let _switching = self.switching.lock().unwrap_or_else(PoisonError::into_inner);

        self.store.get(name)?;

        let record = SelectionRecord {
            current_name: name.to_string(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|err| {
            ProfileError::storage(format!("failed to encode selection record: {err}"))
        })?;
        write_atomically(&self.selection_path, &bytes)?;

        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(name.to_string());
        info!(
            from = previous.as_deref().unwrap_or("<none>"),
            to = name,
            "switched active profile"
        );
        Ok(())
    }

    /// Name of the active profile.
    pub fn current(&self) -> Result<String, ProfileError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProfileError::NoActiveProfile)
    }

    /// Resolves the active profile through the store.
    pub fn current_profile(&self) -> Result<BackendProfile, ProfileError> {
        let name = self.current()?;
        self.store.get(&name)
    }
}
