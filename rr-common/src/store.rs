use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::keys::{
    EXTERNAL_ACCESS_KEYS, ExternalAccessKey, GENERAL_KEYS, GeneralKey, SERVER_KEYS, ServerKey,
    external_access_key_by_name, general_key_by_name, server_key_by_name,
};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

impl SettingValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Text(_) => "text",
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Read { path: PathBuf, source: io::Error },
    Write { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Encode { source: serde_json::Error },
    UnsupportedSchema { path: PathBuf, version: u32 },
    WrongKind {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Read { path, source } => {
                write!(f, "failed to read settings file {}: {source}", path.display())
            }
            SettingsError::Write { path, source } => {
                write!(f, "failed to write settings file {}: {source}", path.display())
            }
            SettingsError::Parse { path, source } => {
                write!(f, "failed to parse settings file {}: {source}", path.display())
            }
            SettingsError::Encode { source } => {
                write!(f, "failed to encode settings snapshot: {source}")
            }
            SettingsError::UnsupportedSchema { path, version } => write!(
                f,
                "settings file {} has unsupported schema_version={version}",
                path.display()
            ),
            SettingsError::WrongKind {
                key,
                expected,
                found,
            } => write!(f, "setting {key} must be {expected}, file holds {found}"),
        }
    }
}

impl std::error::Error for SettingsError {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    schema_version: u32,
    #[serde(default)]
    general: BTreeMap<String, SettingValue>,
    #[serde(default)]
    server: BTreeMap<String, SettingValue>,
    #[serde(default)]
    external_access: BTreeMap<String, SettingValue>,
}

/// Three-partition key/value backend for the live configuration. Every key
/// is present in memory from construction onward; writes go to disk before
/// the in-memory value is allowed to change.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    general: BTreeMap<&'static str, bool>,
    server: BTreeMap<&'static str, String>,
    external_access: BTreeMap<&'static str, String>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let mut store = Self::with_defaults(Some(path.clone()));
        if !path.exists() {
            return Ok(store);
        }

        let data = fs::read(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let file: SettingsFile =
            serde_json::from_slice(&data).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        if file.schema_version != SETTINGS_SCHEMA_VERSION {
            return Err(SettingsError::UnsupportedSchema {
                path,
                version: file.schema_version,
            });
        }

        store.apply_file(file)?;
        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self::with_defaults(None)
    }

    fn with_defaults(path: Option<PathBuf>) -> Self {
        Self {
            path,
            general: GENERAL_KEYS
                .iter()
                .map(|key| (key.name(), key.default_value()))
                .collect(),
            server: SERVER_KEYS
                .iter()
                .map(|key| (key.name(), key.default_value().to_string()))
                .collect(),
            external_access: EXTERNAL_ACCESS_KEYS
                .iter()
                .map(|key| (key.name(), key.default_value().to_string()))
                .collect(),
        }
    }

    fn apply_file(&mut self, file: SettingsFile) -> Result<(), SettingsError> {
        for (name, value) in file.general {
            let Some(key) = general_key_by_name(&name) else {
                warn!("ignoring unknown general setting {name}");
                continue;
            };
            match value {
                SettingValue::Bool(flag) => {
                    self.general.insert(key.name(), flag);
                }
                other => {
                    return Err(SettingsError::WrongKind {
                        key: key.name(),
                        expected: "bool",
                        found: other.kind(),
                    });
                }
            }
        }
        for (name, value) in file.server {
            let Some(key) = server_key_by_name(&name) else {
                warn!("ignoring unknown server setting {name}");
                continue;
            };
            match value {
                SettingValue::Text(text) => {
                    self.server.insert(key.name(), text);
                }
                other => {
                    return Err(SettingsError::WrongKind {
                        key: key.name(),
                        expected: "text",
                        found: other.kind(),
                    });
                }
            }
        }
        for (name, value) in file.external_access {
            let Some(key) = external_access_key_by_name(&name) else {
                warn!("ignoring unknown external-access setting {name}");
                continue;
            };
            match value {
                SettingValue::Text(text) => {
                    self.external_access.insert(key.name(), text);
                }
                other => {
                    return Err(SettingsError::WrongKind {
                        key: key.name(),
                        expected: "text",
                        found: other.kind(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn general_bool(&self, key: GeneralKey) -> bool {
        self.general
            .get(key.name())
            .copied()
            .unwrap_or(key.default_value())
    }

    pub fn server_text(&self, key: ServerKey) -> &str {
        self.server
            .get(key.name())
            .map(String::as_str)
            .unwrap_or(key.default_value())
    }

    pub fn external_access_text(&self, key: ExternalAccessKey) -> &str {
        self.external_access
            .get(key.name())
            .map(String::as_str)
            .unwrap_or(key.default_value())
    }

    pub fn set_general_bool(&mut self, key: GeneralKey, value: bool) -> Result<(), SettingsError> {
        let previous = self.general.insert(key.name(), value);
        if let Err(err) = self.persist() {
            // A failed persist must leave the in-memory value untouched.
            match previous {
                Some(value) => self.general.insert(key.name(), value),
                None => self.general.remove(key.name()),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn set_server_text(&mut self, key: ServerKey, value: &str) -> Result<(), SettingsError> {
        let previous = self.server.insert(key.name(), value.to_string());
        if let Err(err) = self.persist() {
            match previous {
                Some(value) => self.server.insert(key.name(), value),
                None => self.server.remove(key.name()),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn set_external_access_text(
        &mut self,
        key: ExternalAccessKey,
        value: &str,
    ) -> Result<(), SettingsError> {
        let previous = self.external_access.insert(key.name(), value.to_string());
        if let Err(err) = self.persist() {
            match previous {
                Some(value) => self.external_access.insert(key.name(), value),
                None => self.external_access.remove(key.name()),
            };
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), SettingsError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.to_file())
            .map_err(|source| SettingsError::Encode { source })?;
        write_bytes_atomic(path, &bytes)
    }

    fn to_file(&self) -> SettingsFile {
        SettingsFile {
            schema_version: SETTINGS_SCHEMA_VERSION,
            general: self
                .general
                .iter()
                .map(|(name, value)| ((*name).to_string(), SettingValue::Bool(*value)))
                .collect(),
            server: self
                .server
                .iter()
                .map(|(name, value)| ((*name).to_string(), SettingValue::Text(value.clone())))
                .collect(),
            external_access: self
                .external_access
                .iter()
                .map(|(name, value)| ((*name).to_string(), SettingValue::Text(value.clone())))
                .collect(),
        }
    }
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    fs::write(&temp_path, bytes).map_err(|source| SettingsError::Write {
        path: temp_path.clone(),
        source,
    })?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&temp_path, path).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}
