use std::{collections::HashMap, sync::OnceLock};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneralKey {
    CoalitionAudioSecurity,
    SpectatorAudioDisabled,
    ClientExportEnabled,
    LosEnabled,
    DistanceEnabled,
    IrlRadioTx,
    IrlRadioRxInterference,
    RadioExpansion,
    ExternalAccessMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKey {
    Port,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalAccessKey {
    BluePassword,
    RedPassword,
}

pub const GENERAL_KEYS: [GeneralKey; 9] = [
    GeneralKey::CoalitionAudioSecurity,
    GeneralKey::SpectatorAudioDisabled,
    GeneralKey::ClientExportEnabled,
    GeneralKey::LosEnabled,
    GeneralKey::DistanceEnabled,
    GeneralKey::IrlRadioTx,
    GeneralKey::IrlRadioRxInterference,
    GeneralKey::RadioExpansion,
    GeneralKey::ExternalAccessMode,
];

pub const SERVER_KEYS: [ServerKey; 1] = [ServerKey::Port];

pub const EXTERNAL_ACCESS_KEYS: [ExternalAccessKey; 2] = [
    ExternalAccessKey::BluePassword,
    ExternalAccessKey::RedPassword,
];

impl GeneralKey {
    pub const fn name(self) -> &'static str {
        match self {
            GeneralKey::CoalitionAudioSecurity => "COALITION_AUDIO_SECURITY",
            GeneralKey::SpectatorAudioDisabled => "SPECTATOR_AUDIO_DISABLED",
            GeneralKey::ClientExportEnabled => "CLIENT_EXPORT_ENABLED",
            GeneralKey::LosEnabled => "LOS_ENABLED",
            GeneralKey::DistanceEnabled => "DISTANCE_ENABLED",
            GeneralKey::IrlRadioTx => "IRL_RADIO_TX",
            GeneralKey::IrlRadioRxInterference => "IRL_RADIO_RX_INTERFERENCE",
            GeneralKey::RadioExpansion => "RADIO_EXPANSION",
            GeneralKey::ExternalAccessMode => "EXTERNAL_ACCESS_MODE",
        }
    }

    pub const fn default_value(self) -> bool {
        false
    }

    /// Projects the stored boolean into its display label. The mapping is
    /// one-directional: toggling always negates the stored boolean, never
    /// the label. SPECTATOR_AUDIO_DISABLED is the one key whose true state
    /// reads as a restriction.
    pub const fn display_label(self, value: bool) -> &'static str {
        match self {
            GeneralKey::SpectatorAudioDisabled => {
                if value { "DISABLED" } else { "ENABLED" }
            }
            GeneralKey::CoalitionAudioSecurity
            | GeneralKey::ClientExportEnabled
            | GeneralKey::LosEnabled
            | GeneralKey::DistanceEnabled
            | GeneralKey::IrlRadioTx
            | GeneralKey::IrlRadioRxInterference
            | GeneralKey::RadioExpansion
            | GeneralKey::ExternalAccessMode => {
                if value { "ON" } else { "OFF" }
            }
        }
    }
}

impl ServerKey {
    pub const fn name(self) -> &'static str {
        match self {
            ServerKey::Port => "SERVER_PORT",
        }
    }

    pub const fn default_value(self) -> &'static str {
        match self {
            ServerKey::Port => "5002",
        }
    }
}

impl ExternalAccessKey {
    pub const fn name(self) -> &'static str {
        match self {
            ExternalAccessKey::BluePassword => "EXTERNAL_ACCESS_BLUE_PASSWORD",
            ExternalAccessKey::RedPassword => "EXTERNAL_ACCESS_RED_PASSWORD",
        }
    }

    pub const fn default_value(self) -> &'static str {
        ""
    }
}

fn general_keys_by_name() -> &'static HashMap<&'static str, GeneralKey> {
    static LOOKUP: OnceLock<HashMap<&'static str, GeneralKey>> = OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut map = HashMap::with_capacity(GENERAL_KEYS.len());
        for key in GENERAL_KEYS {
            map.insert(key.name(), key);
        }
        map
    })
}

pub fn general_key_by_name(name: &str) -> Option<GeneralKey> {
    general_keys_by_name().get(name).copied()
}

pub fn server_key_by_name(name: &str) -> Option<ServerKey> {
    SERVER_KEYS.into_iter().find(|key| key.name() == name)
}

pub fn external_access_key_by_name(name: &str) -> Option<ExternalAccessKey> {
    EXTERNAL_ACCESS_KEYS
        .into_iter()
        .find(|key| key.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_are_unique_across_namespaces() {
        let mut seen = std::collections::HashSet::new();
        for key in GENERAL_KEYS {
            assert!(seen.insert(key.name()));
        }
        for key in SERVER_KEYS {
            assert!(seen.insert(key.name()));
        }
        for key in EXTERNAL_ACCESS_KEYS {
            assert!(seen.insert(key.name()));
        }
    }

    #[test]
    fn lookup_by_name_round_trips() {
        for key in GENERAL_KEYS {
            assert_eq!(general_key_by_name(key.name()), Some(key));
        }
        for key in SERVER_KEYS {
            assert_eq!(server_key_by_name(key.name()), Some(key));
        }
        for key in EXTERNAL_ACCESS_KEYS {
            assert_eq!(external_access_key_by_name(key.name()), Some(key));
        }
        assert_eq!(general_key_by_name("NO_SUCH_KEY"), None);
    }

    #[test]
    fn spectator_audio_label_reads_inverted() {
        assert_eq!(
            GeneralKey::SpectatorAudioDisabled.display_label(true),
            "DISABLED"
        );
        assert_eq!(
            GeneralKey::SpectatorAudioDisabled.display_label(false),
            "ENABLED"
        );
    }

    #[test]
    fn remaining_boolean_labels_read_on_off() {
        for key in GENERAL_KEYS {
            if key == GeneralKey::SpectatorAudioDisabled {
                continue;
            }
            assert_eq!(key.display_label(true), "ON");
            assert_eq!(key.display_label(false), "OFF");
        }
    }
}
