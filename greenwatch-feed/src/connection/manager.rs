use greenwatch_core::protocol::{self, Frame};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::{ConnectionError, ConnectionState, Link, LinkEvent, ReconnectPolicy, Transport};
use crate::router::MessageRouter;

enum Command {
    Connect,
    Send(String),
}

/// Cheap handle for driving a running connection manager.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Ask the manager to connect. Ignored while a connection is open or an
    /// attempt is already in flight. After the retry budget ran out this
    /// starts over with a fresh budget.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        self.commands
            .send(Command::Connect)
            .map_err(|_| ConnectionError::Stopped)
    }

    /// Serialize `message` and send it if the connection is open.
    ///
    /// Returns `Ok(false)` when not connected. Nothing is queued for later.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool, ConnectionError> {
        if *self.state.borrow() != ConnectionState::Connected {
            debug!("Not connected, dropping outbound message");
            return Ok(false);
        }

        let text = protocol::encode(message)?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ConnectionError::Stopped)?;

        Ok(true)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop the manager. Pending retries are cancelled and the open
    /// connection, if any, is closed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Owns the single connection to the push endpoint and feeds every inbound
/// frame to the router.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    router: MessageRouter,
    policy: ReconnectPolicy,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, router: MessageRouter) -> Self {
        Self {
            transport,
            router,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start the manager task. It stays idle until `connect` is called and
    /// runs until `cancel` fires or every handle is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> (ConnectionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver {
            transport: self.transport,
            router: self.router,
            policy: self.policy,
            commands: commands_rx,
            state: state_tx,
            cancel: cancel.clone(),
            attempts: 0,
        };

        let handle = ConnectionHandle {
            commands: commands_tx,
            state: state_rx,
            cancel,
        };

        (handle, tokio::spawn(driver.run()))
    }
}

enum Phase {
    Idle,
    Connect,
    Wait,
}

enum LinkEnd {
    Closed,
    Failed,
    Cancelled,
}

struct Driver<T: Transport> {
    transport: T,
    router: MessageRouter,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    /// Retries used since the last successful open.
    attempts: u32,
}

impl<T: Transport> Driver<T> {
    #[instrument(name = "connection", skip_all, fields(endpoint = %self.transport.endpoint()))]
    async fn run(mut self) {
        let mut phase = Phase::Idle;

        loop {
            phase = match phase {
                Phase::Idle => {
                    self.set_state(ConnectionState::Disconnected);
                    if !self.wait_for_connect().await {
                        break;
                    }
                    self.attempts = 0;
                    Phase::Connect
                }
                Phase::Connect => match self.connect_once().await {
                    Some(next) => next,
                    None => break,
                },
                Phase::Wait => {
                    if !self.wait_for_retry().await {
                        break;
                    }
                    Phase::Connect
                }
            };
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Returns false when the manager should stop.
    async fn wait_for_connect(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => return true,
                    Some(Command::Send(_)) => debug!("Not connected, dropping outbound message"),
                    None => return false,
                },
            }
        }
    }

    async fn connect_once(&mut self) -> Option<Phase> {
        self.set_state(ConnectionState::Connecting);
        info!(retry = self.attempts, "Connecting");

        let opened = {
            let open = self.transport.open();
            tokio::pin!(open);

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    result = &mut open => break result,
                    Some(command) = self.commands.recv() => match command {
                        Command::Connect => debug!("Connection attempt in flight, ignoring connect"),
                        Command::Send(_) => debug!("Not connected, dropping outbound message"),
                    },
                }
            }
        };

        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "Failed to connect");
                self.set_state(ConnectionState::Errored);
                return Some(self.schedule_retry());
            }
        };

        self.attempts = 0;
        self.set_state(ConnectionState::Connected);
        info!("Connected");

        match self.pump(link).await {
            LinkEnd::Closed => {
                info!("Connection closed");
                self.set_state(ConnectionState::Closed);
            }
            LinkEnd::Failed => self.set_state(ConnectionState::Errored),
            LinkEnd::Cancelled => return None,
        }

        Some(self.schedule_retry())
    }

    async fn pump(&mut self, mut link: Link) -> LinkEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return LinkEnd::Cancelled,
                event = link.events.recv() => match event {
                    Some(LinkEvent::Text(text)) => self.deliver(&text),
                    Some(LinkEvent::Closed) | None => return LinkEnd::Closed,
                    Some(LinkEvent::Failed(reason)) => {
                        warn!(%reason, "Connection error");
                        return LinkEnd::Failed;
                    }
                },
                Some(command) = self.commands.recv() => match command {
                    Command::Connect => debug!("Already connected, ignoring connect"),
                    Command::Send(text) => {
                        if let Err(e) = link.outbound.try_send(text) {
                            warn!(error = %e, "Dropping outbound message");
                        }
                    }
                },
            }
        }
    }

    /// Decode one frame and hand it to the router. Frames that do not decode
    /// are dropped; the connection stays open.
    fn deliver(&self, text: &str) {
        match Frame::decode(text) {
            Ok(frame) => {
                let outcome = self.router.handle_message(frame);
                trace!(?outcome, "Frame handled");
            }
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }

    fn schedule_retry(&mut self) -> Phase {
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            Phase::Wait
        } else {
            warn!(
                retries = self.attempts,
                "Reconnect attempts exhausted, giving up"
            );
            Phase::Idle
        }
    }

    async fn wait_for_retry(&mut self) -> bool {
        self.set_state(ConnectionState::ReconnectWait {
            attempt: self.attempts,
        });
        info!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            delay = ?self.policy.delay,
            "Reconnecting after delay"
        );

        let sleep = tokio::time::sleep(self.policy.delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => match command {
                    Command::Connect => debug!("Reconnect already scheduled, ignoring connect"),
                    Command::Send(_) => debug!("Not connected, dropping outbound message"),
                },
            }
        }
    }
}
