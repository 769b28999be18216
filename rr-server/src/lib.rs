mod admin;
mod control_channel;
mod debounce;
mod logging;
mod mirror;
mod relay;
mod run_state;

pub use admin::{AdminState, build_admin_app};
pub use control_channel::{ControlChannel, ControlEvent, ServerStateEvent};
pub use debounce::{
    CommitAction, DEFAULT_QUIET_PERIOD, DebounceScheduler, SharedDebounce, cancel_commit,
    new_debounce_scheduler, schedule_commit,
};
pub use logging::init as init_logging;
pub use mirror::{
    Coalition, PASSWORD_COMMIT_GROUP, SettingsMirror, SettingsSnapshot, SharedMirror,
    SharedSettings, new_settings_mirror, set_password,
};
pub use relay::{
    ClientRoster, ClientSummary, RelayManager, SharedRelay, SharedRoster, new_relay_manager,
    spawn_relay_manager,
};
pub use run_state::{
    RunState, RunStateTracker, SharedRunState, new_run_state_tracker, request_start_stop,
    spawn_run_state_listener,
};
