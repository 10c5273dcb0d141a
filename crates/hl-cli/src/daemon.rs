//! Headless daemon
//!
//! Runs the session manager in the foreground and stands in for the tray
//! shell: switch, status and open-preferences notifications are logged, and
//! a switched-to host is promoted in the config file so the next launch
//! opens it first. A second launch forwards its link (or a plain open) to
//! the running instance and exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use hl_core::config::{default_host, AppConfig, FileHostStore, HostStore};
use hl_core::link::find_link_arg;
use hl_core::pidfile::{acquire_instance_lock, InstanceLock};
use hl_core::{ConfigError, Host, HostRef};
use hl_manager::ipc::IpcServer;
use hl_manager::{Capabilities, Notification, SessionManager, SessionManagerHandle};
use hl_ssh::{FileKeyStore, HttpKeyUploader, SshTransport};

use crate::commands::CliContext;
use crate::ipc::InstanceClient;
use crate::output::{print_info, print_success};

/// Run the daemon until Ctrl+C, SIGTERM or an IPC shutdown request
///
/// `args` are the launch arguments; the first one carrying the configured
/// protocol scheme is treated as a link to open.
pub async fn run(ctx: &CliContext, args: &[String]) -> Result<()> {
    let config = ctx.load_config()?;
    let protocol = config.resolved_protocol();
    let link = find_link_arg(args.iter().map(String::as_str), &protocol);

    let pid_path = ctx.pid_path();
    let _guard = match acquire_instance_lock(&pid_path)
        .with_context(|| format!("Failed to claim PID file {:?}", pid_path))?
    {
        InstanceLock::Acquired(guard) => guard,
        InstanceLock::Running(pid) => {
            tracing::info!("hostlink already running (pid {}), forwarding", pid);
            return forward(&config, link).await;
        }
    };

    tracing::info!("hostlink starting (protocol {})", protocol);

    let capabilities = Capabilities::new(
        Arc::new(FileKeyStore::new(&config.keys_dir)),
        Arc::new(
            HttpKeyUploader::new(config.connection.connect_timeout)
                .context("Failed to create HTTP client")?,
        ),
        Arc::new(SshTransport::new(config.username.clone()).with_port(config.ssh_port)),
    );
    let manager = SessionManager::new(capabilities, config.connection.clone())
        .with_protocol(protocol)
        .spawn();

    let store = Arc::new(ctx.host_store());
    let notifications = manager.subscribe().await?;
    let shell = tokio::spawn(shell_loop(notifications, manager.clone(), Arc::clone(&store)));

    let hosts = store.hosts().context("Failed to read hosts")?;
    manager.update_hosts(hosts.clone()).await?;
    start_default_host(&manager, &hosts).await?;

    if let Some(url) = link {
        if let Err(e) = manager.open_link(url).await {
            tracing::warn!("Could not open {}: {}", url, e);
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let host_store: Arc<dyn HostStore> = store;
    let server = IpcServer::bind(
        &config.ipc_address(),
        manager.clone(),
        host_store,
        shutdown.clone(),
    )
    .await?;
    let server = tokio::spawn(server.run());

    print_success(&format!("hostlink running (IPC {})", config.ipc_address()));
    shutdown.cancelled().await;

    tracing::info!("Shutting down...");
    match manager.cleanup().await {
        Ok(report) if report.abandoned > 0 => tracing::warn!(
            "Cleanup finished with {} of {} teardowns abandoned",
            report.abandoned,
            report.completed + report.abandoned
        ),
        Ok(report) => tracing::info!("Cleanup closed {} sessions", report.completed),
        Err(e) => tracing::warn!("Cleanup failed: {}", e),
    }

    match server.await {
        Ok(Err(e)) => tracing::warn!("IPC server error: {:#}", e),
        Err(e) => tracing::warn!("IPC server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = shell.await {
        tracing::warn!("Notification task failed: {}", e);
    }

    tracing::info!("hostlink stopped");
    Ok(())
}

/// Activate the first host and start connecting it
///
/// With no hosts the open asks the shell to show preferences instead.
async fn start_default_host(manager: &SessionManagerHandle, hosts: &[Host]) -> Result<()> {
    match default_host(hosts) {
        Ok(first) => {
            manager.open(Some(HostRef::from(first)), true).await?;
        }
        Err(ConfigError::NoHosts) => {
            manager.open(None, false).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Hand the launch intent to the instance that already runs
async fn forward(config: &AppConfig, link: Option<&str>) -> Result<()> {
    let mut client = InstanceClient::with_address(config.ipc_address());
    let session = match link {
        Some(url) => client.open_link(url).await,
        None => client.open(None, true).await,
    }
    .context("Failed to forward to the running instance")?;

    match session {
        Some(session) => print_info(&format!(
            "hostlink is already running; opened {}",
            session.host.title
        )),
        None => print_info("hostlink is already running"),
    }
    Ok(())
}

/// Stand-in for the tray shell
async fn shell_loop(
    mut notifications: tokio::sync::broadcast::Receiver<Notification>,
    manager: SessionManagerHandle,
    store: Arc<FileHostStore>,
) {
    loop {
        match notifications.recv().await {
            Ok(Notification::Switch(session)) => {
                tracing::info!("Active host: {} ({})", session.host.title, session.state);
                promote(&manager, store.as_ref(), &HostRef::from(&session.host)).await;
            }
            Ok(Notification::Change(status)) => {
                tracing::info!("Status: {} ({:?})", status, status.indicator());
            }
            Ok(Notification::OpenPreferences) => {
                tracing::warn!(
                    "No hosts configured; add one with `hostlink hosts add <TITLE> <ADDRESS>`"
                );
            }
            Ok(Notification::StateChanged { host, state }) => {
                tracing::debug!("{} is {}", host.title, state);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Notification stream lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Move the switched-to host to the front of the stored list
async fn promote(manager: &SessionManagerHandle, store: &dyn HostStore, host: &HostRef) {
    let reordered = match store.promote(host) {
        Ok(changed) => changed,
        Err(e) => {
            tracing::warn!("Failed to promote {}: {}", host, e);
            return;
        }
    };
    if !reordered {
        return;
    }

    match store.hosts() {
        Ok(hosts) => {
            if let Err(e) = manager.update_hosts(hosts).await {
                tracing::debug!("Host reorder not applied: {}", e);
            }
        }
        Err(e) => tracing::warn!("Failed to re-read hosts: {}", e),
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown..."),
            _ = terminate => tracing::info!("Received SIGTERM, initiating shutdown..."),
            _ = shutdown.cancelled() => return,
        }

        shutdown.cancel();
    });
}
