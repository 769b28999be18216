mod keys;
mod store;

pub use keys::{
    EXTERNAL_ACCESS_KEYS, ExternalAccessKey, GENERAL_KEYS, GeneralKey, SERVER_KEYS, ServerKey,
    external_access_key_by_name, general_key_by_name, server_key_by_name,
};
pub use store::{SETTINGS_SCHEMA_VERSION, SettingValue, SettingsError, SettingsStore};
