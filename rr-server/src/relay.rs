use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use common::{GeneralKey, ServerKey};
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    control_channel::{ControlChannel, ControlEvent, ServerStateEvent},
    logging::category_relay,
    mirror::SharedSettings,
};

#[derive(Clone, Debug, Serialize)]
pub struct ClientSummary {
    pub id: Uuid,
    pub name: String,
    pub remote_addr: SocketAddr,
    pub connected_unix_ms: u64,
}

struct ConnectedClient {
    ordinal: u64,
    summary: ClientSummary,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
pub struct ClientRoster {
    sequence: AtomicU64,
    clients: RwLock<HashMap<Uuid, ConnectedClient>>,
}

pub type SharedRoster = Arc<ClientRoster>;

impl ClientRoster {
    pub fn count(&self) -> usize {
        self.clients.read().expect("roster lock poisoned").len()
    }

    /// Summaries in connection order.
    pub fn summaries(&self) -> Vec<ClientSummary> {
        let clients = self.clients.read().expect("roster lock poisoned");
        let mut ordered: Vec<(u64, ClientSummary)> = clients
            .values()
            .map(|client| (client.ordinal, client.summary.clone()))
            .collect();
        ordered.sort_by_key(|(ordinal, _)| *ordinal);
        ordered.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Relays one line to every connected client except the sender.
    fn fan_out(&self, from: Uuid, line: &str) {
        let clients = self.clients.read().expect("roster lock poisoned");
        for (id, client) in clients.iter() {
            if *id == from {
                continue;
            }
            let _ = client.outbound.send(line.to_string());
        }
    }

    fn insert(&self, summary: ClientSummary, outbound: mpsc::UnboundedSender<String>) {
        let ordinal = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.clients.write().expect("roster lock poisoned").insert(
            summary.id,
            ConnectedClient {
                ordinal,
                summary,
                outbound,
            },
        );
    }

    fn remove(&self, id: Uuid) -> bool {
        self.clients
            .write()
            .expect("roster lock poisoned")
            .remove(&id)
            .is_some()
    }

    fn clear(&self) {
        self.clients.write().expect("roster lock poisoned").clear();
    }
}

struct ActiveRelay {
    accept_task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Consumes start/stop intent and owns the relay listener. Every start,
/// stop, connect and disconnect is confirmed outward as a state event; the
/// control surface never flips the run state itself.
pub struct RelayManager {
    settings: SharedSettings,
    channel: ControlChannel,
    roster: SharedRoster,
    export_path: PathBuf,
    running: AtomicBool,
    active: tokio::sync::Mutex<Option<ActiveRelay>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

pub type SharedRelay = Arc<RelayManager>;

pub fn new_relay_manager(
    settings: SharedSettings,
    channel: ControlChannel,
    export_path: PathBuf,
) -> SharedRelay {
    Arc::new(RelayManager {
        settings,
        channel,
        roster: Arc::new(ClientRoster::default()),
        export_path,
        running: AtomicBool::new(false),
        active: tokio::sync::Mutex::new(None),
        local_addr: Mutex::new(None),
    })
}

impl RelayManager {
    pub fn roster(&self) -> SharedRoster {
        self.roster.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local addr lock poisoned")
    }

    fn publish_state(&self, is_running: bool) {
        let client_count = if is_running { self.roster.count() } else { 0 };
        self.channel.publish(ControlEvent::ServerState(ServerStateEvent {
            is_running,
            client_count,
        }));
    }

    fn register_client(
        &self,
        id: Uuid,
        name: String,
        remote_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        info!("{} client {name} connected from {remote_addr}", category_relay());
        self.roster.insert(
            ClientSummary {
                id,
                name,
                remote_addr,
                connected_unix_ms: unix_ms(),
            },
            outbound,
        );
        self.publish_state(true);
        self.export_if_enabled();
    }

    fn unregister_client(&self, id: Uuid, name: &str) {
        if !self.roster.remove(id) {
            return;
        }
        info!("{} client {name} disconnected", category_relay());
        if self.running.load(Ordering::SeqCst) {
            self.publish_state(true);
            self.export_if_enabled();
        }
    }

    fn reload_settings(&self) {
        let (audio_security, spectator_audio, los, distance, export) = {
            let store = self.settings.read().expect("settings lock poisoned");
            (
                store.general_bool(GeneralKey::CoalitionAudioSecurity),
                store.general_bool(GeneralKey::SpectatorAudioDisabled),
                store.general_bool(GeneralKey::LosEnabled),
                store.general_bool(GeneralKey::DistanceEnabled),
                store.general_bool(GeneralKey::ClientExportEnabled),
            )
        };
        info!(
            "{} settings reloaded: audio_security={audio_security} spectator_audio_disabled={spectator_audio} los={los} distance={distance} client_export={export}",
            category_relay()
        );
        self.export_if_enabled();
    }

    fn export_if_enabled(&self) {
        let enabled = self
            .settings
            .read()
            .expect("settings lock poisoned")
            .general_bool(GeneralKey::ClientExportEnabled);
        if !enabled {
            return;
        }

        let summaries = self.roster.summaries();
        let bytes = match serde_json::to_vec_pretty(&summaries) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("{} failed to encode client export: {err}", category_relay());
                return;
            }
        };
        if let Some(parent) = self.export_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!(
                "{} failed to create client export directory {}: {err}",
                category_relay(),
                parent.display()
            );
            return;
        }
        if let Err(err) = std::fs::write(&self.export_path, bytes) {
            warn!(
                "{} failed to write client export {}: {err}",
                category_relay(),
                self.export_path.display()
            );
        }
    }
}

pub fn spawn_relay_manager(relay: SharedRelay, autostart: bool) -> JoinHandle<()> {
    let mut events = relay.channel.subscribe();
    tokio::spawn(async move {
        if autostart {
            start_relay(&relay).await;
        } else {
            // Confirm the stopped state so the tracker reflects reality.
            relay.publish_state(false);
        }
        loop {
            match events.recv().await {
                Ok(ControlEvent::StartServerRequested) => start_relay(&relay).await,
                Ok(ControlEvent::StopServerRequested) => stop_relay(&relay).await,
                Ok(ControlEvent::SettingsChanged) => relay.reload_settings(),
                Ok(ControlEvent::ServerState(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("{} lagged behind {skipped} control events", category_relay());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn start_relay(relay: &SharedRelay) {
    let mut active = relay.active.lock().await;
    if active.is_some() {
        info!("{} start requested while already running", category_relay());
        return;
    }

    let port_text = {
        let store = relay.settings.read().expect("settings lock poisoned");
        store.server_text(ServerKey::Port).to_string()
    };
    let port: u16 = match port_text.parse() {
        Ok(port) => port,
        Err(_) => {
            warn!(
                "{} invalid SERVER_PORT {port_text:?}; server stays stopped",
                category_relay()
            );
            relay.publish_state(false);
            return;
        }
    };
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!("{} failed to bind port {port}: {err}", category_relay());
            relay.publish_state(false);
            return;
        }
    };
    let local_addr = listener.local_addr().ok();
    *relay.local_addr.lock().expect("local addr lock poisoned") = local_addr;
    if let Some(addr) = local_addr {
        info!("{} listening on {addr}", category_relay());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_relay = relay.clone();
    let accept_task = tokio::spawn(accept_loop(accept_relay, listener, shutdown_rx));
    *active = Some(ActiveRelay {
        accept_task,
        shutdown: shutdown_tx,
    });
    relay.running.store(true, Ordering::SeqCst);
    relay.publish_state(true);
}

async fn stop_relay(relay: &SharedRelay) {
    let mut active = relay.active.lock().await;
    let Some(current) = active.take() else {
        info!("{} stop requested while not running", category_relay());
        return;
    };

    relay.running.store(false, Ordering::SeqCst);
    let _ = current.shutdown.send(true);
    current.accept_task.abort();
    relay.roster.clear();
    *relay.local_addr.lock().expect("local addr lock poisoned") = None;
    info!("{} stopped; all clients disconnected", category_relay());
    relay.publish_state(false);
}

async fn accept_loop(relay: SharedRelay, listener: TcpListener, shutdown: watch::Receiver<bool>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                let session_relay = relay.clone();
                let session_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    run_client_session(session_relay, stream, remote_addr, session_shutdown).await;
                });
            }
            Err(err) => {
                warn!("{} accept failed: {err}", category_relay());
            }
        }
    }
}

async fn run_client_session(
    relay: SharedRelay,
    stream: TcpStream,
    remote_addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    // The first line is the client's display name; everything after it is
    // relayed to the other connected clients.
    let name = tokio::select! {
        line = reader.next_line() => match line {
            Ok(Some(line)) if !line.trim().is_empty() => line.trim().to_string(),
            _ => {
                info!(
                    "{} connection from {remote_addr} closed before identifying",
                    category_relay()
                );
                return;
            }
        },
        _ = shutdown.changed() => return,
    };

    let id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    relay.register_client(id, name.clone(), remote_addr, outbound_tx);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            line = reader.next_line() => match line {
                Ok(Some(line)) => relay.roster.fan_out(id, &line),
                Ok(None) | Err(_) => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    writer_task.abort();
    relay.unregister_client(id, &name);
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SettingsStore;
    use std::time::Duration;
    use tokio::time::timeout;

    fn in_memory_relay(port: &str) -> (SharedRelay, ControlChannel, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let mut store = SettingsStore::in_memory();
        store
            .set_server_text(ServerKey::Port, port)
            .expect("in-memory set should succeed");
        let settings: SharedSettings = Arc::new(RwLock::new(store));
        let channel = ControlChannel::new();
        let relay = new_relay_manager(
            settings,
            channel.clone(),
            dir.path().join("clients.json"),
        );
        (relay, channel, dir)
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port_and_confirms_running() {
        let (relay, channel, _dir) = in_memory_relay("0");
        let mut events = channel.subscribe();

        start_relay(&relay).await;
        assert!(relay.local_addr().is_some());
        assert_eq!(
            timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("state should publish")
                .expect("channel should be open"),
            ControlEvent::ServerState(ServerStateEvent {
                is_running: true,
                client_count: 0,
            })
        );

        stop_relay(&relay).await;
        assert!(relay.local_addr().is_none());
        assert_eq!(
            timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("state should publish")
                .expect("channel should be open"),
            ControlEvent::ServerState(ServerStateEvent {
                is_running: false,
                client_count: 0,
            })
        );
    }

    #[tokio::test]
    async fn invalid_port_reports_stopped() {
        let (relay, channel, _dir) = in_memory_relay("not-a-port");
        let mut events = channel.subscribe();

        start_relay(&relay).await;
        assert!(relay.local_addr().is_none());
        assert_eq!(
            timeout(Duration::from_secs(1), events.recv())
                .await
                .expect("state should publish")
                .expect("channel should be open"),
            ControlEvent::ServerState(ServerStateEvent {
                is_running: false,
                client_count: 0,
            })
        );
    }
}
