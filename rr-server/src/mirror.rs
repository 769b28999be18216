use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

use common::{ExternalAccessKey, GENERAL_KEYS, GeneralKey, ServerKey, SettingsError, SettingsStore};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    control_channel::{ControlChannel, ControlEvent},
    debounce::{self, SharedDebounce},
    logging::category_settings,
};

pub type SharedSettings = Arc<RwLock<SettingsStore>>;

pub const PASSWORD_COMMIT_GROUP: &str = "external-access-passwords";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coalition {
    Blue,
    Red,
}

/// What the control surface displays: one label per boolean key, the
/// configured port, and the live (possibly not yet committed) password edits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettingsSnapshot {
    pub general: BTreeMap<&'static str, &'static str>,
    pub listening_port: String,
    pub external_access_blue_password: String,
    pub external_access_red_password: String,
}

struct PasswordEdits {
    blue: String,
    red: String,
}

/// Observable projection of the settings store. All reads are derived from
/// canonical store state; every committed write flows back through the store
/// and out as one `SettingsChanged` event.
pub struct SettingsMirror {
    settings: SharedSettings,
    channel: ControlChannel,
    debounce: SharedDebounce,
    passwords: Mutex<PasswordEdits>,
    snapshot: watch::Sender<SettingsSnapshot>,
}

pub type SharedMirror = Arc<SettingsMirror>;

pub fn new_settings_mirror(
    settings: SharedSettings,
    channel: ControlChannel,
    debounce: SharedDebounce,
) -> SharedMirror {
    let (edits, snapshot) = {
        let store = settings.read().expect("settings lock poisoned");
        let edits = PasswordEdits {
            blue: store
                .external_access_text(ExternalAccessKey::BluePassword)
                .to_string(),
            red: store
                .external_access_text(ExternalAccessKey::RedPassword)
                .to_string(),
        };
        let snapshot = build_snapshot(&store, &edits);
        (edits, snapshot)
    };
    let (snapshot, _) = watch::channel(snapshot);
    Arc::new(SettingsMirror {
        settings,
        channel,
        debounce,
        passwords: Mutex::new(edits),
        snapshot,
    })
}

impl SettingsMirror {
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SettingsSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn display_label(&self, key: GeneralKey) -> &'static str {
        let store = self.settings.read().expect("settings lock poisoned");
        key.display_label(store.general_bool(key))
    }

    pub fn listening_port(&self) -> String {
        let store = self.settings.read().expect("settings lock poisoned");
        store.server_text(ServerKey::Port).to_string()
    }

    /// Negates the canonical boolean and persists it, then notifies
    /// observers and publishes exactly one `SettingsChanged`. A failed store
    /// write changes nothing visible.
    pub fn toggle(&self, key: GeneralKey) -> Result<bool, SettingsError> {
        let next = {
            let mut store = self.settings.write().expect("settings lock poisoned");
            let next = !store.general_bool(key);
            store.set_general_bool(key, next)?;
            next
        };
        info!(
            "{} {} => {}",
            category_settings(),
            key.name(),
            key.display_label(next)
        );
        self.refresh_snapshot();
        self.channel.publish(ControlEvent::SettingsChanged);
        Ok(next)
    }

    fn refresh_snapshot(&self) {
        let snapshot = {
            let store = self.settings.read().expect("settings lock poisoned");
            let edits = self.passwords.lock().expect("password lock poisoned");
            build_snapshot(&store, &edits)
        };
        self.snapshot.send_replace(snapshot);
    }
}

/// Records the edit immediately (visible in the snapshot) and schedules the
/// shared debounced commit. Both password fields belong to one commit group:
/// the fired commit re-reads both current values, so a later edit to the
/// sibling field is never lost to the shared timer.
pub fn set_password(mirror: &SharedMirror, coalition: Coalition, value: &str) {
    {
        let mut edits = mirror.passwords.lock().expect("password lock poisoned");
        match coalition {
            Coalition::Blue => edits.blue = value.trim().to_string(),
            Coalition::Red => edits.red = value.trim().to_string(),
        }
    }
    mirror.refresh_snapshot();

    let commit_mirror = mirror.clone();
    debounce::schedule_commit(
        &mirror.debounce,
        PASSWORD_COMMIT_GROUP,
        Box::new(move || commit_passwords(&commit_mirror)),
    );
}

fn commit_passwords(mirror: &SharedMirror) {
    let (blue, red) = {
        let edits = mirror.passwords.lock().expect("password lock poisoned");
        (edits.blue.clone(), edits.red.clone())
    };
    let result = {
        let mut store = mirror.settings.write().expect("settings lock poisoned");
        store
            .set_external_access_text(ExternalAccessKey::BluePassword, &blue)
            .and_then(|()| store.set_external_access_text(ExternalAccessKey::RedPassword, &red))
    };
    match result {
        Ok(()) => {
            info!(
                "{} committed external-access passwords",
                category_settings()
            );
            mirror.channel.publish(ControlEvent::SettingsChanged);
        }
        Err(err) => {
            // The edit state is kept; the next keystroke schedules a retry.
            error!(
                "{} failed to commit external-access passwords: {err}",
                category_settings()
            );
        }
    }
}

fn build_snapshot(store: &SettingsStore, edits: &PasswordEdits) -> SettingsSnapshot {
    SettingsSnapshot {
        general: GENERAL_KEYS
            .iter()
            .map(|key| (key.name(), key.display_label(store.general_bool(*key))))
            .collect(),
        listening_port: store.server_text(ServerKey::Port).to_string(),
        external_access_blue_password: edits.blue.clone(),
        external_access_red_password: edits.red.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::new_debounce_scheduler;
    use std::time::{Duration, Instant};
    use tokio::{sync::broadcast::error::TryRecvError, time::sleep, time::timeout};

    fn in_memory_mirror(quiet_period: Duration) -> (SharedMirror, ControlChannel) {
        let settings: SharedSettings = Arc::new(RwLock::new(SettingsStore::in_memory()));
        let channel = ControlChannel::new();
        let mirror = new_settings_mirror(
            settings,
            channel.clone(),
            new_debounce_scheduler(quiet_period),
        );
        (mirror, channel)
    }

    #[tokio::test]
    async fn toggle_flips_display_and_publishes_once() {
        let (mirror, channel) = in_memory_mirror(Duration::from_millis(50));
        let mut events = channel.subscribe();
        let snapshots = mirror.subscribe();

        assert_eq!(
            mirror.display_label(GeneralKey::CoalitionAudioSecurity),
            "OFF"
        );
        let next = mirror
            .toggle(GeneralKey::CoalitionAudioSecurity)
            .expect("toggle should commit");
        assert!(next);
        assert_eq!(
            mirror.display_label(GeneralKey::CoalitionAudioSecurity),
            "ON"
        );
        assert_eq!(
            mirror.snapshot().general["COALITION_AUDIO_SECURITY"],
            "ON"
        );

        assert_eq!(
            events.recv().await.expect("event should arrive"),
            ControlEvent::SettingsChanged
        );
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
        assert!(snapshots.has_changed().expect("mirror should be alive"));
    }

    #[tokio::test]
    async fn double_toggle_round_trips() {
        let (mirror, channel) = in_memory_mirror(Duration::from_millis(50));
        let mut events = channel.subscribe();

        mirror
            .toggle(GeneralKey::SpectatorAudioDisabled)
            .expect("toggle should commit");
        assert_eq!(
            mirror.display_label(GeneralKey::SpectatorAudioDisabled),
            "DISABLED"
        );
        mirror
            .toggle(GeneralKey::SpectatorAudioDisabled)
            .expect("toggle should commit");
        assert_eq!(
            mirror.display_label(GeneralKey::SpectatorAudioDisabled),
            "ENABLED"
        );

        for _ in 0..2 {
            assert_eq!(
                events.recv().await.expect("event should arrive"),
                ControlEvent::SettingsChanged
            );
        }
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn failed_store_write_changes_nothing_visible() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").expect("fixture should write");

        let store = SettingsStore::open(blocker.join("nested/settings.json"))
            .expect("open should succeed");
        let settings: SharedSettings = Arc::new(RwLock::new(store));
        let channel = ControlChannel::new();
        let mirror = new_settings_mirror(
            settings,
            channel.clone(),
            new_debounce_scheduler(Duration::from_millis(50)),
        );
        let mut events = channel.subscribe();
        let before = mirror.snapshot();

        mirror
            .toggle(GeneralKey::LosEnabled)
            .expect_err("persist should fail");
        assert_eq!(mirror.display_label(GeneralKey::LosEnabled), "OFF");
        assert_eq!(mirror.snapshot(), before);
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn rapid_password_edits_commit_once_with_final_values() {
        let (mirror, channel) = in_memory_mirror(Duration::from_millis(100));
        let mut events = channel.subscribe();

        for value in ["a", "ab", "abc"] {
            set_password(&mirror, Coalition::Blue, value);
            sleep(Duration::from_millis(10)).await;
        }
        set_password(&mirror, Coalition::Red, "red-secret");
        let last_edit = Instant::now();

        // Snapshot shows the edits immediately; the store holds nothing yet.
        assert_eq!(mirror.snapshot().external_access_blue_password, "abc");
        {
            let store = mirror.settings.read().expect("settings lock poisoned");
            assert_eq!(
                store.external_access_text(ExternalAccessKey::BluePassword),
                ""
            );
        }

        assert_eq!(
            timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("commit should fire")
                .expect("channel should be open"),
            ControlEvent::SettingsChanged
        );
        assert!(last_edit.elapsed() >= Duration::from_millis(100));
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);

        let store = mirror.settings.read().expect("settings lock poisoned");
        assert_eq!(
            store.external_access_text(ExternalAccessKey::BluePassword),
            "abc"
        );
        assert_eq!(
            store.external_access_text(ExternalAccessKey::RedPassword),
            "red-secret"
        );
    }

    #[tokio::test]
    async fn password_edits_are_trimmed() {
        let (mirror, channel) = in_memory_mirror(Duration::from_millis(40));
        let mut events = channel.subscribe();

        set_password(&mirror, Coalition::Blue, "  padded  ");
        assert_eq!(mirror.snapshot().external_access_blue_password, "padded");

        timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("commit should fire")
            .expect("channel should be open");
        let store = mirror.settings.read().expect("settings lock poisoned");
        assert_eq!(
            store.external_access_text(ExternalAccessKey::BluePassword),
            "padded"
        );
    }
}
