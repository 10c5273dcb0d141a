//! Commands that drive a running instance

use anyhow::Result;

use hl_core::HostRef;

use super::{report, CliContext};
use crate::ipc::{ClientError, SessionInfo};
use crate::output::{print_info, print_success, print_warning};

/// Open a host, or forward a protocol link
pub async fn open_command(
    ctx: &CliContext,
    link: Option<&str>,
    host: Option<&str>,
    no_connect: bool,
) -> Result<()> {
    let mut client = ctx.client()?;

    let opened = match link {
        Some(url) => client.open_link(url).await,
        None => client.open(host.map(HostRef::from), !no_connect).await,
    }
    .map_err(|e| report("open", e))?;

    print_opened(opened.as_ref());
    Ok(())
}

/// Switch the active host without connecting
pub async fn set_command(ctx: &CliContext, host: &str) -> Result<()> {
    let mut client = ctx.client()?;
    let session = client
        .set(HostRef::from(host))
        .await
        .map_err(|e| report("switch host", e))?;

    print_opened(session.as_ref());
    Ok(())
}

/// Tear down and re-provision a host
pub async fn restart_command(ctx: &CliContext, host: Option<&str>) -> Result<()> {
    let mut client = ctx.client()?;
    client
        .force_restart(host.map(HostRef::from))
        .await
        .map_err(|e| report("restart", e))?;

    print_success(&format!("Restarting {}", host.unwrap_or("active host")));
    Ok(())
}

/// Disconnect a host
pub async fn disconnect_command(ctx: &CliContext, host: Option<&str>) -> Result<()> {
    let mut client = ctx.client()?;
    client
        .disconnect(host.map(HostRef::from))
        .await
        .map_err(|e| report("disconnect", e))?;

    print_success(&format!("Disconnected {}", host.unwrap_or("active host")));
    Ok(())
}

/// Ask the running instance to clean up and exit
pub async fn stop_command(ctx: &CliContext) -> Result<()> {
    let mut client = ctx.client()?;

    print_info("Stopping hostlink...");
    match client.shutdown().await {
        Ok(()) => {
            print_success("hostlink stopped");
            Ok(())
        }
        Err(ClientError::NotRunning(_)) => {
            print_warning("hostlink is not running");
            Ok(())
        }
        Err(e) => Err(report("stop hostlink", e)),
    }
}

fn print_opened(session: Option<&SessionInfo>) {
    match session {
        Some(session) => print_success(&format!(
            "{} ({}) is active: {}",
            session.host.title, session.host.address, session.state
        )),
        None => print_info("Nothing to open. Add a host with: hostlink hosts add"),
    }
}
