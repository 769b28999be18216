use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStateEvent {
    pub is_running: bool,
    pub client_count: usize,
}

/// The four event kinds that cross between the control surface and the relay
/// lifecycle. Intent flows outward (start/stop/settings), state flows inward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    StartServerRequested,
    StopServerRequested,
    SettingsChanged,
    ServerState(ServerStateEvent),
}

#[derive(Clone)]
pub struct ControlChannel {
    sender: broadcast::Sender<ControlEvent>,
}

impl ControlChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Never blocks the publisher; publishing with no subscriber is a no-op.
    pub fn publish(&self, event: ControlEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.sender.subscribe()
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let channel = ControlChannel::new();
        channel.publish(ControlEvent::SettingsChanged);
    }

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let channel = ControlChannel::new();
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        channel.publish(ControlEvent::StartServerRequested);
        channel.publish(ControlEvent::SettingsChanged);
        channel.publish(ControlEvent::ServerState(ServerStateEvent {
            is_running: true,
            client_count: 3,
        }));

        for receiver in [&mut first, &mut second] {
            assert_eq!(
                receiver.recv().await.expect("event should arrive"),
                ControlEvent::StartServerRequested
            );
            assert_eq!(
                receiver.recv().await.expect("event should arrive"),
                ControlEvent::SettingsChanged
            );
            assert_eq!(
                receiver.recv().await.expect("event should arrive"),
                ControlEvent::ServerState(ServerStateEvent {
                    is_running: true,
                    client_count: 3,
                })
            );
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events_only() {
        let channel = ControlChannel::new();
        channel.publish(ControlEvent::StopServerRequested);

        let mut late = channel.subscribe();
        channel.publish(ControlEvent::SettingsChanged);
        assert_eq!(
            late.recv().await.expect("event should arrive"),
            ControlEvent::SettingsChanged
        );
    }
}
