use std::sync::Arc;

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::info;

use crate::{
    control_channel::{ControlChannel, ControlEvent, ServerStateEvent},
    logging::category_control,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunState {
    pub is_running: bool,
    pub client_count: usize,
}

impl RunState {
    pub const fn start_stop_label(&self) -> &'static str {
        if self.is_running {
            "Stop Server"
        } else {
            "Start Server"
        }
    }
}

/// Last-known authoritative relay state. Mutated only by inbound state
/// events; operator intent never writes here.
pub struct RunStateTracker {
    state: watch::Sender<RunState>,
}

pub type SharedRunState = Arc<RunStateTracker>;

/// The tracker starts in the running state: the relay autostarts at boot and
/// confirms with its first state event.
pub fn new_run_state_tracker() -> SharedRunState {
    let (state, _) = watch::channel(RunState {
        is_running: true,
        client_count: 0,
    });
    Arc::new(RunStateTracker { state })
}

impl RunStateTracker {
    pub fn current(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn apply(&self, event: ServerStateEvent) {
        self.state.send_replace(RunState {
            is_running: event.is_running,
            client_count: event.client_count,
        });
    }
}

/// Reads the last-known state and publishes the matching intent. The tracked
/// state does not change until the relay confirms with a state event.
pub fn request_start_stop(tracker: &SharedRunState, channel: &ControlChannel) -> ControlEvent {
    let (intent, verb) = if tracker.current().is_running {
        (ControlEvent::StopServerRequested, "stop")
    } else {
        (ControlEvent::StartServerRequested, "start")
    };
    info!("{} operator requested server {verb}", category_control());
    channel.publish(intent.clone());
    intent
}

pub fn spawn_run_state_listener(
    tracker: SharedRunState,
    channel: &ControlChannel,
) -> JoinHandle<()> {
    let mut events = channel.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControlEvent::ServerState(event)) => tracker.apply(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
