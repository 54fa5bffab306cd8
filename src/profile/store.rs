//! File-per-profile persistence.
//!
//! Each profile lives in `<root>/<name>.json`. Writes go to a uniquely named
//! hidden temporary file in the same directory which is then renamed over the
//! record, so concurrent readers and writers only ever see whole records.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::{BackendProfile, ProfileError};

const RECORD_EXTENSION: &str = "json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable mapping from profile name to [`BackendProfile`].
#[derive(Debug)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            ProfileError::storage(format!(
                "failed to create profile directory {:?}: {err}",
                root
            ))
        })?;
        Ok(Self { root })
    }

    /// Directory holding the profile records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `profile` under its name, replacing any previous record.
    pub fn put(&self, profile: &BackendProfile) -> Result<(), ProfileError> {
        let bytes = serde_json::to_vec_pretty(profile).map_err(|err| {
            ProfileError::storage(format!(
                "failed to encode profile {:?}: {err}",
                profile.name
            ))
        })?;
        let path = self.record_path(&profile.name);
        write_atomically(&path, &bytes)?;
        debug!(profile = %profile.name, path = ?path, "stored profile record");
        Ok(())
    }

    /// Returns the names of all stored profiles in lexical order.
    pub fn list(&self) -> Result<Vec<String>, ProfileError> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            ProfileError::storage(format!(
                "failed to read profile directory {:?}: {err}",
                self.root
            ))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                ProfileError::storage(format!(
                    "failed to read profile directory {:?}: {err}",
                    self.root
                ))
            })?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if stem.is_empty() || stem.starts_with('.') {
                continue;
            }
            names.push(stem.to_string());
        }

        names.sort();
        Ok(names)
    }

    /// Loads the profile stored under `name`.
    pub fn get(&self, name: &str) -> Result<BackendProfile, ProfileError> {
        let path = self.record_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ProfileError::NotFound(name.to_string()));
            }
            Err(err) => {
                return Err(ProfileError::storage(format!(
                    "failed to read profile record {:?}: {err}",
                    path
                )));
            }
        };

        serde_json::from_slice(&bytes).map_err(|err| {
            ProfileError::storage(format!("corrupt profile record {:?}: {err}", path))
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{RECORD_EXTENSION}"))
    }
}

/// Replaces `target` with `bytes` via a sibling temporary file and a rename.
pub(crate) fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), ProfileError> {
    let tmp_path = tmp_path_for(target);

    let result = (|| {
        let mut out = File::create(&tmp_path)?;
        out.write_all(bytes)?;
        out.sync_all()?;
        fs::rename(&tmp_path, target)
    })();

    result.map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        ProfileError::storage(format!("failed to write {:?}: {err}", target))
    })
}

fn tmp_path_for(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(
        ".{file_name}.{}.{seq}.tmp",
        std::process::id()
    ))
}
