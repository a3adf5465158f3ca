//! Durable key/value storage for credentials and the last submitted form

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::api::{TripFormData, UserInfo};

pub const TOKEN_KEY: &str = "trip_planner_token";
pub const USER_KEY: &str = "trip_planner_user";
pub const FORM_DATA_KEY: &str = "trip_form_data";

const APP_DIR: &str = "trip-planner";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot find data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One JSON file per key under a per-profile directory.
///
/// Reads never fail: a missing, unreadable or malformed entry is reported
/// as absent.
#[derive(Debug, Clone)]
pub struct Storage {
    profile: String,
    dir: PathBuf,
}

impl Storage {
    pub fn new(profile: &str) -> Result<Self> {
        let base = dirs::data_dir().ok_or(StorageError::NoDataDir)?;
        Ok(Self::at(base.join(APP_DIR).join(profile), profile))
    }

    pub fn at(dir: impl Into<PathBuf>, profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            dir: dir.into(),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring malformed entry {}: {}", key, e);
                None
            }
        }
    }

    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string_pretty(value).map_err(|source| {
            StorageError::Serialize {
                key: key.to_string(),
                source,
            }
        })?;

        // Write atomically via temp file + rename
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.read(TOKEN_KEY)
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        self.write(TOKEN_KEY, &token)
    }

    pub fn user(&self) -> Option<UserInfo> {
        self.read(USER_KEY)
    }

    pub fn set_user(&self, user: &UserInfo) -> Result<()> {
        self.write(USER_KEY, user)
    }

    pub fn clear_token(&self) -> Result<()> {
        self.remove(TOKEN_KEY)
    }

    /// Drop the token and cached profile, e.g. on logout or a 401.
    pub fn clear_credentials(&self) -> Result<()> {
        self.remove(TOKEN_KEY)?;
        self.remove(USER_KEY)
    }

    pub fn form_data(&self) -> Option<TripFormData> {
        self.read(FORM_DATA_KEY)
    }

    pub fn set_form_data(&self, form: &TripFormData) -> Result<()> {
        self.write(FORM_DATA_KEY, form)
    }

    pub fn clear_form_data(&self) -> Result<()> {
        self.remove(FORM_DATA_KEY)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn sample_form() -> TripFormData {
        TripFormData {
            city: "Chengdu".to_string(),
            start_date: "2026-10-01".to_string(),
            end_date: "2026-10-04".to_string(),
            travel_days: 4,
            transportation: "train".to_string(),
            accommodation: "guesthouse".to_string(),
            preferences: vec!["food".to_string(), "pandas".to_string()],
            free_text_input: Some("avoid early mornings".to_string()),
        }
    }

    #[test]
    fn test_form_data_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Storage::at(temp.path(), "default");

        assert_eq!(storage.form_data(), None);
        storage.set_form_data(&sample_form()).unwrap();
        assert_eq!(storage.form_data(), Some(sample_form()));

        // A fresh handle on the same directory sees the same value
        let reloaded = Storage::at(temp.path(), "default");
        assert_eq!(reloaded.form_data(), Some(sample_form()));

        storage.clear_form_data().unwrap();
        assert_eq!(reloaded.form_data(), None);
    }

    #[test]
    fn test_malformed_entry_reads_as_absent() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Storage::at(temp.path(), "default");

        fs::write(temp.path().join("trip_form_data.json"), "{not json").unwrap();
        assert_eq!(storage.form_data(), None);

        fs::write(temp.path().join("trip_planner_user.json"), "[1, 2]").unwrap();
        assert_eq!(storage.user(), None);
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Storage::at(temp.path().join("never-created"), "default");
        storage.clear_form_data().unwrap();
        storage.clear_credentials().unwrap();
    }

    #[test]
    fn test_credentials() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Storage::at(temp.path(), "default");

        storage.set_token("abc.def.ghi").unwrap();
        let user: UserInfo =
            serde_json::from_str(r#"{"username":"wang","email":"wang@example.com"}"#).unwrap();
        storage.set_user(&user).unwrap();

        assert_eq!(storage.token().as_deref(), Some("abc.def.ghi"));
        assert_eq!(storage.user(), Some(user.clone()));

        storage.clear_token().unwrap();
        assert_eq!(storage.token(), None);
        assert_eq!(storage.user(), Some(user));

        storage.set_token("abc.def.ghi").unwrap();
        storage.clear_credentials().unwrap();
        assert_eq!(storage.token(), None);
        assert_eq!(storage.user(), None);
    }

    #[test]
    #[serial]
    fn test_new_uses_profile_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        std::env::set_var("HOME", temp.path());
        std::env::set_var("XDG_DATA_HOME", temp.path().join(".local/share"));

        let storage = Storage::new("work").unwrap();
        assert_eq!(storage.profile(), "work");
        assert!(storage.dir().starts_with(temp.path()));
        assert!(storage.dir().ends_with("trip-planner/work"));
    }
}
