//! Session manager actor and its handle

use std::collections::HashSet;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;

use hl_core::config::{ConnectionPolicy, DEFAULT_PROTOCOL};
use hl_core::ipc::{ManagerStatus, SessionInfo};
use hl_core::link;
use hl_core::{ConnectionState, Host, HostId, HostRef, SessionError, SessionId};

use super::{CleanupReport, Notification};
use crate::connection::{Capabilities, DriverHandle, SessionDriver, SessionUpdate};
use crate::status::StatusAggregator;

/// Pending commands before callers start waiting
const COMMAND_BUFFER: usize = 64;

/// Notifications kept for slow subscribers
const NOTIFICATION_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum ManagerCommand {
    UpdateHosts {
        hosts: Vec<Host>,
        reply: oneshot::Sender<()>,
    },
    Open {
        host: Option<HostRef>,
        auto_connect: bool,
        reply: Reply<Option<SessionInfo>>,
    },
    Set {
        host: HostRef,
        reply: Reply<Option<SessionInfo>>,
    },
    ForceRestart {
        host: Option<HostRef>,
        reply: Reply<()>,
    },
    Disconnect {
        host: Option<HostRef>,
        reply: Reply<()>,
    },
    OpenLink {
        url: String,
        reply: Reply<Option<SessionInfo>>,
    },
    Snapshot {
        reply: oneshot::Sender<ManagerStatus>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<Notification>>,
    },
    Cleanup {
        reply: oneshot::Sender<CleanupReport>,
    },
}

/// Builder for the session manager actor
pub struct SessionManager {
    capabilities: Capabilities,
    policy: ConnectionPolicy,
    protocol: String,
}

impl SessionManager {
    /// Create a manager that provisions hosts with `capabilities`
    pub fn new(capabilities: Capabilities, policy: ConnectionPolicy) -> Self {
        Self {
            capabilities,
            policy,
            protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }

    /// Scheme accepted by [`SessionManagerHandle::open_link`]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Start the actor. It runs until [`SessionManagerHandle::cleanup`] is
    /// called or every handle is dropped.
    pub fn spawn(self) -> SessionManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

        let actor = ManagerActor {
            capabilities: self.capabilities,
            policy: self.policy,
            protocol: self.protocol,
            sessions: Vec::new(),
            active: None,
            aggregator: StatusAggregator::new(),
            commands: command_rx,
            updates: update_rx,
            update_tx,
            notifications,
            retiring: JoinSet::new(),
            retiring_aborts: Vec::new(),
        };
        tokio::spawn(actor.run());

        SessionManagerHandle {
            commands: command_tx,
        }
    }
}

/// Cloneable handle to the session manager
#[derive(Clone)]
pub struct SessionManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
}

impl SessionManagerHandle {
    /// Reconcile sessions against the ordered host list
    pub async fn update_hosts(&self, hosts: Vec<Host>) -> Result<(), SessionError> {
        self.call(|reply| ManagerCommand::UpdateHosts { hosts, reply })
            .await
    }

    /// Activate a host (the active or first one when `host` is `None`) and
    /// connect it unless `auto_connect` is false.
    ///
    /// Returns `Ok(None)` when no hosts are configured.
    pub async fn open(
        &self,
        host: Option<HostRef>,
        auto_connect: bool,
    ) -> Result<Option<SessionInfo>, SessionError> {
        self.call(|reply| ManagerCommand::Open {
            host,
            auto_connect,
            reply,
        })
        .await?
    }

    /// Switch the active host without connecting
    pub async fn set(&self, host: HostRef) -> Result<Option<SessionInfo>, SessionError> {
        self.call(|reply| ManagerCommand::Set { host, reply }).await?
    }

    /// Force-restart a host (the active one when `host` is `None`)
    pub async fn force_restart(&self, host: Option<HostRef>) -> Result<(), SessionError> {
        self.call(|reply| ManagerCommand::ForceRestart { host, reply })
            .await?
    }

    /// Disconnect a host (the active one when `host` is `None`)
    pub async fn disconnect(&self, host: Option<HostRef>) -> Result<(), SessionError> {
        self.call(|reply| ManagerCommand::Disconnect { host, reply })
            .await?
    }

    /// Route a protocol link. Links that do not parse are ignored.
    pub async fn open_link(&self, url: impl Into<String>) -> Result<Option<SessionInfo>, SessionError> {
        let url = url.into();
        self.call(|reply| ManagerCommand::OpenLink { url, reply })
            .await?
    }

    /// Sessions in configuration order plus the aggregate status
    pub async fn snapshot(&self) -> Result<ManagerStatus, SessionError> {
        self.call(|reply| ManagerCommand::Snapshot { reply }).await
    }

    /// Receive notifications emitted after this call
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Notification>, SessionError> {
        self.call(|reply| ManagerCommand::Subscribe { reply }).await
    }

    /// Tear down every session and stop the manager
    pub async fn cleanup(&self) -> Result<CleanupReport, SessionError> {
        self.call(|reply| ManagerCommand::Cleanup { reply }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::ManagerStopped)?;
        reply_rx.await.map_err(|_| SessionError::ManagerStopped)
    }
}

struct Session {
    id: SessionId,
    host: Host,
    state: ConnectionState,
    driver: DriverHandle,
}

impl Session {
    fn info(&self, active: bool) -> SessionInfo {
        SessionInfo {
            id: self.id,
            host: self.host.clone(),
            state: self.state,
            active,
        }
    }
}

struct ManagerActor {
    capabilities: Capabilities,
    policy: ConnectionPolicy,
    protocol: String,
    sessions: Vec<Session>,
    active: Option<SessionId>,
    aggregator: StatusAggregator,
    commands: mpsc::Receiver<ManagerCommand>,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    update_tx: mpsc::UnboundedSender<SessionUpdate>,
    notifications: broadcast::Sender<Notification>,
    /// Teardowns of removed sessions
    retiring: JoinSet<()>,
    retiring_aborts: Vec<AbortHandle>,
}

impl ManagerActor {
    async fn run(mut self) {
        tracing::info!("Session manager started");

        loop {
            tokio::select! {
                biased;
                Some(update) = self.updates.recv() => self.on_update(update),
                Some(_) = self.retiring.join_next(), if !self.retiring.is_empty() => {
                    self.retiring_aborts.retain(|handle| !handle.is_finished());
                }
                command = self.commands.recv() => match command {
                    Some(ManagerCommand::Cleanup { reply }) => {
                        let report = self.cleanup().await;
                        let _ = reply.send(report);
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.cleanup().await;
                        break;
                    }
                },
            }
        }

        tracing::info!("Session manager stopped");
    }

    fn handle(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::UpdateHosts { hosts, reply } => {
                self.update_hosts(hosts);
                let _ = reply.send(());
            }
            ManagerCommand::Open {
                host,
                auto_connect,
                reply,
            } => {
                let _ = reply.send(self.open(host, auto_connect));
            }
            ManagerCommand::Set { host, reply } => {
                let _ = reply.send(self.set(&host));
            }
            ManagerCommand::ForceRestart { host, reply } => {
                let result = self.target(host.as_ref()).map(|index| {
                    let session = &self.sessions[index];
                    tracing::info!("Force restarting {}", session.host.address);
                    session.driver.force_restart();
                });
                let _ = reply.send(result);
            }
            ManagerCommand::Disconnect { host, reply } => {
                let result = self.target(host.as_ref()).map(|index| {
                    let session = &self.sessions[index];
                    tracing::info!("Disconnecting {}", session.host.address);
                    session.driver.disconnect();
                });
                let _ = reply.send(result);
            }
            ManagerCommand::OpenLink { url, reply } => {
                let result = match link::parse_link(&url, &self.protocol) {
                    Some(target) => self.open(target.host, true),
                    None => Ok(None),
                };
                let _ = reply.send(result);
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ManagerCommand::Subscribe { reply } => {
                let _ = reply.send(self.notifications.subscribe());
            }
            // Handled by the run loop
            ManagerCommand::Cleanup { .. } => {}
        }
    }

    fn on_update(&mut self, update: SessionUpdate) {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == update.session_id) else {
            tracing::debug!(
                "Ignoring update from retired session {}",
                update.session_id
            );
            return;
        };

        session.state = update.state;
        let host = session.host.clone();
        self.notify(Notification::StateChanged {
            host,
            state: update.state,
        });

        if self.active == Some(update.session_id) {
            self.recompute_status();
        }
    }

    fn update_hosts(&mut self, hosts: Vec<Host>) {
        let mut seen = HashSet::new();
        let mut wanted = Vec::with_capacity(hosts.len());
        for host in hosts {
            if seen.insert(host.id()) {
                wanted.push(host);
            } else {
                tracing::warn!(
                    "Dropping duplicate host {:?} ({})",
                    host.title,
                    host.address
                );
            }
        }

        let mut previous = std::mem::take(&mut self.sessions);
        let mut sessions = Vec::with_capacity(wanted.len());
        for host in wanted {
            let id = host.id();
            match previous.iter().position(|s| s.host.id() == id) {
                Some(index) => {
                    let mut session = previous.swap_remove(index);
                    if session.host != host {
                        session.driver.update_host(host.clone());
                        session.host = host;
                    }
                    sessions.push(session);
                }
                None => sessions.push(self.create_session(host)),
            }
        }
        self.sessions = sessions;

        let mut active_removed = false;
        for session in previous {
            if self.active == Some(session.id) {
                self.active = None;
                active_removed = true;
            }
            self.retire(session);
        }

        if active_removed {
            tracing::info!("Active host was removed");
            self.recompute_status();
        }
    }

    fn open(
        &mut self,
        host: Option<HostRef>,
        auto_connect: bool,
    ) -> Result<Option<SessionInfo>, SessionError> {
        if self.sessions.is_empty() {
            tracing::info!("No hosts configured; requesting preferences");
            self.notify(Notification::OpenPreferences);
            return Ok(None);
        }

        let index = match host {
            Some(reference) => self.resolve(&reference)?,
            None => self.active_index().unwrap_or(0),
        };
        let info = self.activate(index);

        let session = &self.sessions[index];
        if auto_connect && session.state != ConnectionState::Online {
            session.driver.connect();
        }
        Ok(Some(info))
    }

    fn set(&mut self, host: &HostRef) -> Result<Option<SessionInfo>, SessionError> {
        if self.sessions.is_empty() {
            self.notify(Notification::OpenPreferences);
            return Ok(None);
        }
        let index = self.resolve(host)?;
        Ok(Some(self.activate(index)))
    }

    fn activate(&mut self, index: usize) -> SessionInfo {
        let session = &self.sessions[index];
        if self.active != Some(session.id) {
            tracing::info!(
                "Switching to {} ({})",
                session.host.title,
                session.host.address
            );
        }
        self.active = Some(session.id);

        let info = session.info(true);
        self.notify(Notification::Switch(info.clone()));
        self.recompute_status();
        info
    }

    async fn cleanup(&mut self) -> CleanupReport {
        let sessions = std::mem::take(&mut self.sessions);
        tracing::info!("Cleaning up {} sessions", sessions.len());
        for session in sessions {
            self.retire(session);
        }
        if self.active.take().is_some() {
            self.recompute_status();
        }

        let deadline = Instant::now() + self.policy.cleanup_timeout;
        let mut report = CleanupReport::default();
        while !self.retiring.is_empty() {
            match tokio::time::timeout_at(deadline, self.retiring.join_next()).await {
                Ok(Some(_)) => report.completed += 1,
                Ok(None) | Err(_) => break,
            }
        }

        report.abandoned = self.retiring.len();
        if report.abandoned > 0 {
            tracing::warn!(
                "Abandoning {} teardowns still running after {:?}",
                report.abandoned,
                self.policy.cleanup_timeout
            );
            for handle in self.retiring_aborts.drain(..) {
                handle.abort();
            }
            self.retiring.abort_all();
        }

        tracing::info!(
            "Cleanup finished: {} completed, {} abandoned",
            report.completed,
            report.abandoned
        );
        report
    }

    fn create_session(&self, host: Host) -> Session {
        let id = SessionId::new();
        tracing::info!("New session {} for {} ({})", id, host.title, host.address);
        let driver = SessionDriver::spawn(
            id,
            host.clone(),
            self.capabilities.clone(),
            self.policy.clone(),
            self.update_tx.clone(),
        );
        Session {
            id,
            host,
            state: ConnectionState::Offline,
            driver,
        }
    }

    fn retire(&mut self, session: Session) {
        tracing::info!(
            "Tearing down session {} for {}",
            session.id,
            session.host.address
        );
        self.retiring_aborts.push(session.driver.abort_handle());
        self.retiring.spawn(session.driver.shutdown());
    }

    fn snapshot(&self) -> ManagerStatus {
        ManagerStatus {
            status: self.aggregator.current(),
            sessions: self
                .sessions
                .iter()
                .map(|s| s.info(self.active == Some(s.id)))
                .collect(),
        }
    }

    fn recompute_status(&mut self) {
        let state = self
            .active_index()
            .map(|index| self.sessions[index].state);
        if let Some(status) = self.aggregator.recompute(state) {
            tracing::info!("Status is now {}", status);
            self.notify(Notification::Change(status));
        }
    }

    /// Index of the referenced session, by address first then by title
    fn resolve(&self, reference: &HostRef) -> Result<usize, SessionError> {
        let id = HostId::from_address(reference.as_str());
        self.sessions
            .iter()
            .position(|s| s.host.id() == id)
            .or_else(|| self.sessions.iter().position(|s| s.host.matches(reference)))
            .ok_or_else(|| SessionError::UnknownHost(reference.to_string()))
    }

    /// Index of the referenced session, or the active one
    fn target(&self, reference: Option<&HostRef>) -> Result<usize, SessionError> {
        match reference {
            Some(reference) => self.resolve(reference),
            None => self.active_index().ok_or(SessionError::NoActiveSession),
        }
    }

    fn active_index(&self) -> Option<usize> {
        let active = self.active?;
        self.sessions.iter().position(|s| s.id == active)
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is not an error
        let _ = self.notifications.send(notification);
    }
}
