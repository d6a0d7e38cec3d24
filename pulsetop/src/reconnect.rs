//! Keeps one logical subscription to the agent alive across connection loss.
//!
//! State machine: `Disconnected -> Connecting -> Open -> Disconnected -> ...`,
//! with a fixed delay between attempts and a terminal `GaveUp` once more than
//! `max_retries` consecutive attempts fail. Every transition into `Open`
//! sends a fresh `subscribe`, so subscription state never outlives a channel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{ClientMessage, ServerMessage, Snapshot};
use crate::ws::{Connector, Transport};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
    /// Terminal: retries exhausted.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// What callers observe about the connection.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: ConnState,
    pub connected: bool,
    /// Consecutive failures since the last successful open.
    pub attempts: u32,
    /// Snapshots received over the manager's lifetime.
    pub updates: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_snapshot: Option<Arc<Snapshot>>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ConnState::Disconnected,
            connected: false,
            attempts: 0,
            updates: 0,
            last_update: None,
            last_snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    RequestUpdate,
    Disconnect,
}

enum SessionEnd {
    Lost,
    Disconnect,
}

enum Event {
    Frame(Option<Result<ServerMessage, crate::ws::ClientError>>),
    Command(Option<Command>),
}

pub struct ReconnectManager<C: Connector> {
    connector: C,
    config: ReconnectConfig,
}

impl<C: Connector> ReconnectManager<C> {
    pub fn new(connector: C, config: ReconnectConfig) -> Self {
        Self { connector, config }
    }

    /// Start the connection task and hand back its control surface.
    pub fn spawn(self) -> ManagerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let task = tokio::spawn(self.run(cmd_rx, status_tx));
        ManagerHandle {
            commands: cmd_tx,
            status: status_rx,
            task,
        }
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<Command>,
        status: watch::Sender<ClientStatus>,
    ) -> ConnState {
        let mut failures: u32 = 0;
        loop {
            set_state(&status, ConnState::Connecting, failures);
            let attempt = tokio::select! {
                res = self.connector.connect() => Some(res),
                _ = until_disconnect(&mut commands) => None,
            };

            match attempt {
                None => return finish(&status, ConnState::Disconnected, failures),
                Some(Ok(mut transport)) => {
                    failures = 0;
                    set_state(&status, ConnState::Open, failures);
                    info!("connected, subscribing");
                    let end = if transport.send(&ClientMessage::Subscribe).await.is_err() {
                        SessionEnd::Lost
                    } else {
                        session(&mut transport, &mut commands, &status).await
                    };
                    match end {
                        SessionEnd::Disconnect => {
                            // Best effort; the peer may already be gone.
                            let _ = transport.send(&ClientMessage::Unsubscribe).await;
                            transport.close().await;
                            return finish(&status, ConnState::Disconnected, failures);
                        }
                        SessionEnd::Lost => {
                            transport.close().await;
                            warn!("connection lost");
                        }
                    }
                }
                Some(Err(e)) => warn!(error = %e, "connect attempt failed"),
            }

            failures += 1;
            if failures > self.config.max_retries {
                warn!(attempts = failures, "giving up on agent connection");
                return finish(&status, ConnState::GaveUp, failures);
            }
            set_state(&status, ConnState::Disconnected, failures);
            debug!(
                attempt = failures,
                delay_ms = self.config.retry_delay.as_millis() as u64,
                "retrying after delay"
            );

            let delay = tokio::time::sleep(self.config.retry_delay);
            tokio::pin!(delay);
            tokio::select! {
                _ = &mut delay => {}
                _ = until_disconnect(&mut commands) => {
                    return finish(&status, ConnState::Disconnected, failures);
                }
            }
        }
    }
}

fn set_state(status: &watch::Sender<ClientStatus>, state: ConnState, attempts: u32) {
    status.send_modify(|s| {
        s.state = state;
        s.connected = state == ConnState::Open;
        s.attempts = attempts;
    });
}

fn finish(status: &watch::Sender<ClientStatus>, state: ConnState, attempts: u32) -> ConnState {
    set_state(status, state, attempts);
    state
}

/// Resolves once a disconnect is requested or every handle is gone.
/// Update requests arriving while no channel is open are dropped.
async fn until_disconnect(commands: &mut mpsc::Receiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::RequestUpdate) => debug!("update requested while not connected"),
            Some(Command::Disconnect) | None => return,
        }
    }
}

async fn session<T: Transport>(
    transport: &mut T,
    commands: &mut mpsc::Receiver<Command>,
    status: &watch::Sender<ClientStatus>,
) -> SessionEnd {
    loop {
        let event = tokio::select! {
            frame = transport.recv() => Event::Frame(frame),
            cmd = commands.recv() => Event::Command(cmd),
        };
        match event {
            Event::Frame(None) => return SessionEnd::Lost,
            Event::Frame(Some(Ok(ServerMessage::SystemUpdate(snapshot)))) => {
                let snapshot = Arc::new(snapshot);
                status.send_modify(|s| {
                    s.updates += 1;
                    s.last_update = Some(Utc::now());
                    s.last_snapshot = Some(snapshot);
                });
            }
            Event::Frame(Some(Ok(ServerMessage::Connected { hostname, .. }))) => {
                debug!(host = hostname.as_deref().unwrap_or("?"), "agent greeted");
            }
            Event::Frame(Some(Ok(ServerMessage::Error { message }))) => {
                warn!(%message, "agent rejected a frame");
            }
            Event::Frame(Some(Err(e))) => warn!(error = %e, "ignoring frame"),
            Event::Command(Some(Command::RequestUpdate)) => {
                if transport.send(&ClientMessage::RequestUpdate).await.is_err() {
                    return SessionEnd::Lost;
                }
            }
            Event::Command(Some(Command::Disconnect) | None) => return SessionEnd::Disconnect,
        }
    }
}

/// Control surface for a running [`ReconnectManager`].
pub struct ManagerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ClientStatus>,
    task: JoinHandle<ConnState>,
}

impl ManagerHandle {
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.status.borrow().last_update
    }

    pub fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.status.borrow().last_snapshot.clone()
    }

    /// Wait for the next status change. False once the manager has stopped.
    pub async fn changed(&mut self) -> bool {
        self.status.changed().await.is_ok()
    }

    /// Ask for an immediate lightweight snapshot. False if the manager is gone
    /// or its command queue is full.
    pub fn request_update(&self) -> bool {
        self.commands.try_send(Command::RequestUpdate).is_ok()
    }

    /// Unsubscribe, close, and stop retrying. Returns the final state.
    pub async fn disconnect(self) -> ConnState {
        let _ = self.commands.send(Command::Disconnect).await;
        self.join().await
    }

    /// Wait for the manager to stop on its own (`GaveUp`).
    pub async fn join(self) -> ConnState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "reconnect task failed");
                ConnState::Disconnected
            }
        }
    }
}
