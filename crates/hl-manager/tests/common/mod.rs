//! Shared fakes for session manager tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use hl_core::config::{BackoffConfig, ConnectionPolicy};
use hl_core::traits::{KeyStore, KeyUploader, SyncChannel, SyncTransport};
use hl_core::{
    ConnectionState, Host, HostId, ProvisioningError, PublicKeyInfo, Status, TransportError,
};
use hl_manager::{Capabilities, Notification};

/// Upper bound for any wait; paused time makes this cheap
pub const WAIT: Duration = Duration::from_secs(600);

/// In-memory key cache
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<HostId, PublicKeyInfo>>,
    fail_generate: AtomicBool,
    generated: AtomicUsize,
}

impl MemoryKeyStore {
    pub fn insert(&self, host: &Host) {
        self.keys
            .lock()
            .unwrap()
            .insert(host.id(), fake_key(host));
    }

    pub fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self, host: &Host) -> Result<Option<PublicKeyInfo>, ProvisioningError> {
        Ok(self.keys.lock().unwrap().get(&host.id()).cloned())
    }

    async fn generate(&self, host: &Host) -> Result<PublicKeyInfo, ProvisioningError> {
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(ProvisioningError::KeyGeneration("disk full".into()));
        }
        self.generated.fetch_add(1, Ordering::SeqCst);
        let key = fake_key(host);
        self.keys.lock().unwrap().insert(host.id(), key.clone());
        Ok(key)
    }
}

fn fake_key(host: &Host) -> PublicKeyInfo {
    let name = host.id().key_name();
    PublicKeyInfo {
        openssh: format!("ssh-ed25519 AAAA{} hostlink", name),
        fingerprint: format!("SHA256:{}", name),
        private_key_path: PathBuf::from(format!("/keys/{}", name)),
    }
}

/// What the next upload does
#[derive(Debug, Clone, Copy)]
pub enum UploadStep {
    Accept,
    Reject,
    Unreachable,
    Stall,
}

/// Uploader that follows a script, accepting once the script runs out
#[derive(Default)]
pub struct ScriptedUploader {
    script: Mutex<VecDeque<UploadStep>>,
    calls: AtomicUsize,
}

impl ScriptedUploader {
    pub fn push(&self, step: UploadStep) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyUploader for ScriptedUploader {
    async fn upload(&self, _host: &Host, _key: &PublicKeyInfo) -> Result<(), ProvisioningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UploadStep::Accept);
        match step {
            UploadStep::Accept => Ok(()),
            UploadStep::Reject => Err(ProvisioningError::UploadRejected("401".into())),
            UploadStep::Unreachable => Err(ProvisioningError::Network("refused".into())),
            UploadStep::Stall => std::future::pending().await,
        }
    }
}

/// Transport that counts channels
#[derive(Default)]
pub struct CountingTransport {
    live: Arc<AtomicUsize>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    probe_fails: Arc<AtomicBool>,
    open_fails: AtomicBool,
    open_delay: Mutex<Duration>,
}

impl CountingTransport {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_probe_fails(&self, fail: bool) {
        self.probe_fails.store(fail, Ordering::SeqCst);
    }

    pub fn set_open_fails(&self, fail: bool) {
        self.open_fails.store(fail, Ordering::SeqCst);
    }

    /// Hold each new channel this long before handing it back
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl SyncTransport for CountingTransport {
    async fn open(
        &self,
        host: &Host,
        _key: &PublicKeyInfo,
    ) -> Result<Arc<dyn SyncChannel>, TransportError> {
        if self.open_fails.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(host.address.clone()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let channel: Arc<dyn SyncChannel> = Arc::new(CountingChannel {
            closed: AtomicBool::new(false),
            live: Arc::clone(&self.live),
            closes: Arc::clone(&self.closes),
            probe_fails: Arc::clone(&self.probe_fails),
        });

        // Allocated before the handshake finishes; dropping here leaks it
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(channel)
    }
}

struct CountingChannel {
    closed: AtomicBool,
    live: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    probe_fails: Arc<AtomicBool>,
}

#[async_trait]
impl SyncChannel for CountingChannel {
    async fn probe(&self) -> Result<(), TransportError> {
        if self.probe_fails.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ProbeFailed("no answer".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Fakes plus the capabilities built from them
pub struct Harness {
    pub keys: Arc<MemoryKeyStore>,
    pub uploader: Arc<ScriptedUploader>,
    pub transport: Arc<CountingTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(MemoryKeyStore::default()),
            uploader: Arc::new(ScriptedUploader::default()),
            transport: Arc::new(CountingTransport::default()),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(
            self.keys.clone(),
            self.uploader.clone(),
            self.transport.clone(),
        )
    }
}

/// Deterministic, quick policy
pub fn test_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        backoff: BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.0,
        },
        provision_attempts: 3,
        connect_timeout: Duration::from_secs(5),
        probe_interval: Duration::from_secs(1),
        probe_timeout: Duration::from_millis(500),
        probe_failure_threshold: 2,
        max_reconnects: 2,
        teardown_timeout: Duration::from_millis(200),
        cleanup_timeout: Duration::from_secs(2),
    }
}

pub fn host(title: &str, address: &str) -> Host {
    Host::new(title, address)
}

/// Collect `address`'s states until `target` is seen (inclusive)
pub async fn wait_for_state(
    rx: &mut broadcast::Receiver<Notification>,
    address: &str,
    target: ConnectionState,
) -> Vec<ConnectionState> {
    let collect = async {
        let mut seen = Vec::new();
        loop {
            if let Notification::StateChanged { host, state } = rx.recv().await.unwrap() {
                if host.address == address {
                    seen.push(state);
                    if state == target {
                        return seen;
                    }
                }
            }
        }
    };
    tokio::time::timeout(WAIT, collect)
        .await
        .unwrap_or_else(|_| panic!("{} never reached {}", address, target))
}

/// Next aggregate status change
pub async fn next_change(rx: &mut broadcast::Receiver<Notification>) -> Status {
    let find = async {
        loop {
            if let Notification::Change(status) = rx.recv().await.unwrap() {
                return status;
            }
        }
    };
    tokio::time::timeout(WAIT, find)
        .await
        .expect("no status change")
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("condition never held");
}
