//! Supervised task that drives one session
//!
//! The driver owns the session's state, cached key and live channel. Every
//! I/O step runs as its own cancellable task so the loop keeps observing
//! commands while a step is in flight. Commands are polled first; a step's
//! result only takes effect if the step was not cancelled in the meantime.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use hl_core::config::ConnectionPolicy;
use hl_core::traits::SyncChannel;
use hl_core::{
    ConnectionState, FailureCause, Host, ProvisioningError, PublicKeyInfo, SessionId,
    TransportError,
};

use super::backoff::ExponentialBackoff;
use super::machine::{self, Effect, Event};
use super::Capabilities;

/// State change reported by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    /// Session that changed
    pub session_id: SessionId,
    /// Its new state
    pub state: ConnectionState,
}

#[derive(Debug)]
enum DriverCommand {
    Connect,
    ForceRestart,
    Disconnect,
    UpdateHost(Host),
    Shutdown,
}

/// Handle to a running driver
pub struct DriverHandle {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<DriverCommand>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Session this driver belongs to
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Start provisioning unless already connecting or online
    pub fn connect(&self) {
        self.send(DriverCommand::Connect);
    }

    /// Tear down and provision from scratch
    pub fn force_restart(&self) {
        self.send(DriverCommand::ForceRestart);
    }

    /// Tear down and stay offline
    pub fn disconnect(&self) {
        self.send(DriverCommand::Disconnect);
    }

    /// Adopt a new title or credential without restarting
    pub fn update_host(&self, host: Host) {
        self.send(DriverCommand::UpdateHost(host));
    }

    /// Handle that kills the driver task outright
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Tear down the session and wait for the driver to exit
    pub async fn shutdown(self) {
        self.send(DriverCommand::Shutdown);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::error!("Driver for session {} panicked: {}", self.session_id, e);
            }
        }
    }

    fn send(&self, command: DriverCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Driver for session {} already stopped", self.session_id);
        }
    }
}

/// A running I/O step. Dropping it cancels and aborts the task.
struct Step {
    token: CancellationToken,
    handle: JoinHandle<StepOutcome>,
}

impl Drop for Step {
    fn drop(&mut self) {
        self.token.cancel();
        self.handle.abort();
    }
}

enum StepOutcome {
    KeyLoaded(Result<Option<PublicKeyInfo>, ProvisioningError>),
    KeyGenerated(Result<PublicKeyInfo, ProvisioningError>),
    Uploaded(Result<(), ProvisioningError>),
    ChannelOpened(Result<Arc<dyn SyncChannel>, TransportError>),
    Probed(Result<(), TransportError>),
    Cancelled,
    Crashed,
}

enum Wake {
    Command(Option<DriverCommand>),
    Step(StepOutcome),
    Retry,
    Probe,
}

/// Connection state machine for one host
pub struct SessionDriver {
    session_id: SessionId,
    host: Host,
    state: ConnectionState,
    capabilities: Capabilities,
    policy: ConnectionPolicy,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    key: Option<PublicKeyInfo>,
    channel: Option<Arc<dyn SyncChannel>>,
    step: Option<Step>,
    retry_at: Option<Instant>,
    next_probe: Option<Instant>,
    backoff: ExponentialBackoff,
    reconnects: u32,
    probe_failures: u32,
}

impl SessionDriver {
    /// Spawn a driver for `host`, starting `offline`.
    ///
    /// State changes are sent on `updates` tagged with `session_id`.
    pub fn spawn(
        session_id: SessionId,
        host: Host,
        capabilities: Capabilities,
        policy: ConnectionPolicy,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> DriverHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let driver = Self {
            session_id,
            host,
            state: ConnectionState::Offline,
            capabilities,
            backoff: ExponentialBackoff::from_config(&policy.backoff),
            policy,
            commands: command_rx,
            updates,
            key: None,
            channel: None,
            step: None,
            retry_at: None,
            next_probe: None,
            reconnects: 0,
            probe_failures: 0,
        };

        DriverHandle {
            session_id,
            commands: command_tx,
            task: tokio::spawn(driver.run()),
        }
    }

    async fn run(mut self) {
        tracing::debug!(
            "Driver started for session {} ({})",
            self.session_id,
            self.host.address
        );

        loop {
            let wake = tokio::select! {
                biased;
                command = self.commands.recv() => Wake::Command(command),
                outcome = join_step(&mut self.step), if self.step.is_some() => Wake::Step(outcome),
                _ = sleep_until(self.retry_at), if self.retry_at.is_some() => Wake::Retry,
                _ = sleep_until(self.next_probe), if self.next_probe.is_some() => Wake::Probe,
            };

            match wake {
                Wake::Command(Some(DriverCommand::Shutdown)) | Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.on_command(command).await,
                Wake::Step(outcome) => {
                    self.step = None;
                    if let Some(event) = self.on_step(outcome).await {
                        self.apply(event).await;
                    }
                }
                Wake::Retry => {
                    self.retry_at = None;
                    self.apply(Event::Connect).await;
                }
                Wake::Probe => self.start_probe(),
            }
        }

        self.tear_down().await;
        self.publish(ConnectionState::Offline, false);
        tracing::debug!("Driver stopped for session {}", self.session_id);
    }

    async fn on_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Connect => {
                self.reconnects = 0;
                self.backoff.reset();
                self.apply(Event::Connect).await;
            }
            DriverCommand::ForceRestart => self.apply(Event::ForceRestart).await,
            DriverCommand::Disconnect => self.apply(Event::Disconnect).await,
            DriverCommand::UpdateHost(host) => {
                tracing::debug!("Session {} adopting host {:?}", self.session_id, host.title);
                self.host = host;
            }
            DriverCommand::Shutdown => {}
        }
    }

    /// Apply `event` and any follow-up events its effects produce
    async fn apply(&mut self, event: Event) {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let Some(transition) = machine::transition(self.state, event) else {
                tracing::debug!(
                    "Session {} ignoring {:?} while {}",
                    self.session_id,
                    event,
                    self.state
                );
                continue;
            };

            if transition.effect.tears_down() {
                self.tear_down().await;
            }
            self.publish(
                transition.to,
                transition.effect == Effect::TearDownAndRestart,
            );
            next = self.perform(transition.effect);
        }
    }

    fn perform(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::BeginProvisioning => self.start_provisioning(),
            Effect::TearDownAndRestart => {
                self.reconnects = 0;
                self.backoff.reset();
                self.key = None;
                self.start_provisioning();
            }
            Effect::GenerateKey => {
                let keys = Arc::clone(&self.capabilities.keys);
                let host = self.host.clone();
                let policy = self.policy.clone();
                self.start_step(async move {
                    StepOutcome::KeyGenerated(
                        with_retry("Key generation", &policy, || keys.generate(&host)).await,
                    )
                });
            }
            Effect::UploadKey => {
                let Some(key) = self.key.clone() else {
                    tracing::error!("Session {} has no key to upload", self.session_id);
                    return Some(Event::Failed(FailureCause::KeyGenerationFailed));
                };
                let uploader = Arc::clone(&self.capabilities.uploader);
                let host = self.host.clone();
                let policy = self.policy.clone();
                self.start_step(async move {
                    StepOutcome::Uploaded(
                        with_retry("Key upload", &policy, || uploader.upload(&host, &key)).await,
                    )
                });
            }
            Effect::StartChannel => {
                let Some(key) = self.key.clone() else {
                    return Some(Event::LinkLost);
                };
                let transport = Arc::clone(&self.capabilities.transport);
                let host = self.host.clone();
                let timeout = self.policy.connect_timeout;
                let teardown_timeout = self.policy.teardown_timeout;
                self.start_cancellable_step(move |cancelled| async move {
                    let mut open = Box::pin(async move {
                        match tokio::time::timeout(timeout, transport.open(&host, &key)).await {
                            Ok(result) => result,
                            Err(_) => Err(TransportError::Timeout(timeout)),
                        }
                    });
                    tokio::select! {
                        result = &mut open => return StepOutcome::ChannelOpened(result),
                        _ = cancelled.cancelled() => {}
                    }
                    // The open may already hold a channel; let it land and close it
                    tokio::spawn(async move {
                        if let Ok(channel) = open.await {
                            let _ = tokio::time::timeout(teardown_timeout, channel.close()).await;
                        }
                    });
                    StepOutcome::Cancelled
                });
            }
            Effect::TearDownAndRetry => {
                self.reconnects += 1;
                if self.reconnects > self.policy.max_reconnects {
                    tracing::error!(
                        "Giving up on {} after {} reconnect attempts",
                        self.host.address,
                        self.policy.max_reconnects
                    );
                    return Some(Event::ReconnectsExhausted);
                }
                let delay = self.backoff.next_delay();
                tracing::info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    self.host.address,
                    delay,
                    self.reconnects,
                    self.policy.max_reconnects
                );
                self.retry_at = Some(Instant::now() + delay);
            }
            Effect::TearDown => {
                self.reconnects = 0;
                self.backoff.reset();
            }
            Effect::SurfaceError => {
                tracing::error!(
                    "Session {} for {} failed: {}",
                    self.session_id,
                    self.host.address,
                    self.state
                );
            }
        }
        None
    }

    async fn on_step(&mut self, outcome: StepOutcome) -> Option<Event> {
        match outcome {
            StepOutcome::KeyLoaded(Ok(Some(key))) => {
                tracing::debug!("Using cached key {} for {}", key.fingerprint, self.host.address);
                self.key = Some(key);
                Some(Event::KeyFound)
            }
            StepOutcome::KeyLoaded(Ok(None)) => Some(Event::KeyMissing),
            StepOutcome::KeyLoaded(Err(e)) => {
                tracing::warn!(
                    "Could not read cached key for {}: {}; generating a new one",
                    self.host.address,
                    e
                );
                Some(Event::KeyMissing)
            }
            StepOutcome::KeyGenerated(Ok(key)) => {
                tracing::info!("Generated key {} for {}", key.fingerprint, self.host.address);
                self.key = Some(key);
                Some(Event::KeyGenerated)
            }
            StepOutcome::KeyGenerated(Err(e)) | StepOutcome::Uploaded(Err(e)) => {
                tracing::error!("Provisioning {} failed: {}", self.host.address, e);
                Some(Event::Failed(e.cause()))
            }
            StepOutcome::Uploaded(Ok(())) => Some(Event::UploadAcknowledged),
            StepOutcome::ChannelOpened(Ok(channel)) => {
                if self.state != ConnectionState::Online {
                    self.close_channel(channel).await;
                    return None;
                }
                tracing::info!("Sync channel to {} established", self.host.address);
                self.channel = Some(channel);
                self.probe_failures = 0;
                self.schedule_probe();
                None
            }
            StepOutcome::ChannelOpened(Err(e)) => {
                tracing::warn!("Sync channel to {} failed: {}", self.host.address, e);
                Some(Event::LinkLost)
            }
            StepOutcome::Probed(Ok(())) => {
                if self.reconnects > 0 {
                    tracing::info!("Link to {} is healthy again", self.host.address);
                }
                self.probe_failures = 0;
                self.reconnects = 0;
                self.backoff.reset();
                self.schedule_probe();
                None
            }
            StepOutcome::Probed(Err(e)) => {
                self.probe_failures += 1;
                tracing::warn!(
                    "Probe {}/{} to {} failed: {}",
                    self.probe_failures,
                    self.policy.probe_failure_threshold,
                    self.host.address,
                    e
                );
                if self.probe_failures >= self.policy.probe_failure_threshold.max(1) {
                    Some(Event::LinkLost)
                } else {
                    self.schedule_probe();
                    None
                }
            }
            StepOutcome::Cancelled => None,
            StepOutcome::Crashed => {
                if self.state.is_provisioning() {
                    Some(Event::Failed(FailureCause::NetworkUnreachable))
                } else {
                    Some(Event::LinkLost)
                }
            }
        }
    }

    fn start_provisioning(&mut self) {
        self.retry_at = None;
        let keys = Arc::clone(&self.capabilities.keys);
        let host = self.host.clone();
        self.start_step(async move { StepOutcome::KeyLoaded(keys.load(&host).await) });
    }

    fn start_probe(&mut self) {
        self.next_probe = None;
        let Some(channel) = self.channel.clone() else {
            return;
        };
        let timeout = self.policy.probe_timeout;
        self.start_step(async move {
            let result = match tokio::time::timeout(timeout, channel.probe()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };
            StepOutcome::Probed(result)
        });
    }

    fn schedule_probe(&mut self) {
        self.next_probe = Some(Instant::now() + self.policy.probe_interval);
    }

    /// Spawn `work`, dropping it as soon as the step is cancelled
    fn start_step<F>(&mut self, work: F)
    where
        F: Future<Output = StepOutcome> + Send + 'static,
    {
        self.start_cancellable_step(move |cancelled| async move {
            tokio::select! {
                _ = cancelled.cancelled() => StepOutcome::Cancelled,
                outcome = work => outcome,
            }
        });
    }

    /// Spawn a step that watches its own cancellation token
    fn start_cancellable_step<F, Fut>(&mut self, work: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = StepOutcome> + Send + 'static,
    {
        // Replacing the step drops, and so aborts, any stale one
        let token = CancellationToken::new();
        let handle = tokio::spawn(work(token.clone()));
        self.step = Some(Step { token, handle });
    }

    /// Cancel the in-flight step, then close the channel
    async fn tear_down(&mut self) {
        self.retry_at = None;
        self.next_probe = None;
        self.probe_failures = 0;

        if let Some(mut step) = self.step.take() {
            step.token.cancel();
            match tokio::time::timeout(self.policy.teardown_timeout, &mut step.handle).await {
                Ok(Ok(StepOutcome::ChannelOpened(Ok(channel)))) => {
                    self.close_channel(channel).await;
                }
                Ok(_) => {}
                // Dropping the step aborts it
                Err(_) => tracing::warn!(
                    "Step for session {} did not stop within {:?}; aborting",
                    self.session_id,
                    self.policy.teardown_timeout
                ),
            }
        }

        if let Some(channel) = self.channel.take() {
            self.close_channel(channel).await;
        }
    }

    async fn close_channel(&self, channel: Arc<dyn SyncChannel>) {
        match tokio::time::timeout(self.policy.teardown_timeout, channel.close()).await {
            Ok(Ok(())) => tracing::debug!("Closed sync channel to {}", self.host.address),
            Ok(Err(e)) => {
                tracing::warn!("Error closing channel to {}: {}", self.host.address, e)
            }
            Err(_) => tracing::warn!(
                "Closing channel to {} timed out after {:?}",
                self.host.address,
                self.policy.teardown_timeout
            ),
        }
    }

    fn publish(&mut self, state: ConnectionState, always: bool) {
        if state == self.state && !always {
            return;
        }
        tracing::info!(
            "{} ({}): {} -> {}",
            self.host.title,
            self.host.address,
            self.state,
            state
        );
        self.state = state;
        // A closed receiver means the manager has stopped listening
        let _ = self.updates.send(SessionUpdate {
            session_id: self.session_id,
            state,
        });
    }
}

async fn join_step(step: &mut Option<Step>) -> StepOutcome {
    let Some(step) = step.as_mut() else {
        return std::future::pending().await;
    };
    match (&mut step.handle).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Step task failed: {}", e);
            StepOutcome::Crashed
        }
    }
}

fn sleep_until(deadline: Option<Instant>) -> Sleep {
    tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now))
}

/// Run `op` up to `provision_attempts` times with backoff between attempts.
///
/// Errors that are not retryable are returned immediately.
async fn with_retry<T, F, Fut>(
    what: &str,
    policy: &ConnectionPolicy,
    mut op: F,
) -> Result<T, ProvisioningError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProvisioningError>>,
{
    let attempts = policy.provision_attempts.max(1);
    let mut backoff = ExponentialBackoff::from_config(&policy.backoff);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn policy(attempts: u32) -> ConnectionPolicy {
        ConnectionPolicy {
            provision_attempts: attempts,
            ..ConnectionPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", &policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProvisioningError::Network("refused".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = with_retry("op", &policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProvisioningError::KeyGeneration("disk full".into()))
        })
        .await;
        assert!(matches!(result, Err(ProvisioningError::KeyGeneration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoff sleeps happened between the three attempts
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_dropping_step_stops_its_task() {
        let (held, released) = oneshot::channel::<()>();
        let token = CancellationToken::new();
        let handle = tokio::spawn(async move {
            let _held = held;
            std::future::pending::<StepOutcome>().await
        });

        drop(Step {
            token: token.clone(),
            handle,
        });

        assert!(token.is_cancelled());
        // The aborted task drops its sender
        assert!(released.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("op", &policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProvisioningError::UploadRejected("401".into()))
        })
        .await;
        assert!(matches!(result, Err(ProvisioningError::UploadRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = with_retry("op", &policy(0), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProvisioningError::Network("down".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
