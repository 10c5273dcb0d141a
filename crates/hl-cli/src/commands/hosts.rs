//! Host list commands
//!
//! These edit the config file directly and then ask a running instance, if
//! any, to re-read it.

use anyhow::{Context, Result};

use hl_core::config::HostStore;
use hl_core::{Host, HostRef};

use super::CliContext;
use crate::ipc::ClientError;
use crate::output::{format_hosts, print_error, print_success, print_warning};

/// List configured hosts in launch order
pub fn hosts_list(ctx: &CliContext) -> Result<()> {
    let hosts = ctx.host_store().hosts().context("Failed to read hosts")?;
    println!("{}", format_hosts(&hosts));
    Ok(())
}

/// Add a host, replacing any entry with the same address
pub async fn hosts_add(
    ctx: &CliContext,
    title: &str,
    address: &str,
    credential: Option<String>,
    username: Option<String>,
) -> Result<()> {
    if address.trim().is_empty() {
        anyhow::bail!("Host address must not be empty");
    }

    let host = Host {
        title: title.to_string(),
        address: address.trim().to_string(),
        credential,
        username,
    };
    ctx.host_store()
        .add(host)
        .with_context(|| format!("Failed to save {:?}", ctx.config_path()))?;

    print_success(&format!("Added {} ({})", title, address.trim()));
    notify_running(ctx).await;
    Ok(())
}

/// Remove a host by address or title
pub async fn hosts_remove(ctx: &CliContext, host: &str) -> Result<()> {
    let removed = ctx
        .host_store()
        .remove(&HostRef::from(host))
        .with_context(|| format!("Failed to save {:?}", ctx.config_path()))?;

    if !removed {
        print_error(&format!("Unknown host: {}", host));
        anyhow::bail!("Unknown host: {}", host);
    }

    print_success(&format!("Removed {}", host));
    notify_running(ctx).await;
    Ok(())
}

/// Move a host to the front so it opens first
pub async fn hosts_promote(ctx: &CliContext, host: &str) -> Result<()> {
    let store = ctx.host_store();
    let reference = HostRef::from(host);
    let hosts = store.hosts().context("Failed to read hosts")?;
    if !hosts.iter().any(|h| h.matches(&reference)) {
        print_error(&format!("Unknown host: {}", host));
        anyhow::bail!("Unknown host: {}", host);
    }

    if store
        .promote(&reference)
        .with_context(|| format!("Failed to save {:?}", ctx.config_path()))?
    {
        print_success(&format!("{} now opens first", host));
        notify_running(ctx).await;
    } else {
        print_success(&format!("{} already opens first", host));
    }
    Ok(())
}

/// Tell a running instance the host list changed
async fn notify_running(ctx: &CliContext) {
    let mut client = match ctx.client() {
        Ok(client) => client,
        Err(e) => {
            tracing::debug!("Not notifying running instance: {:#}", e);
            return;
        }
    };

    match client.reload_hosts().await {
        Ok(()) => tracing::debug!("Running instance reloaded its hosts"),
        Err(ClientError::NotRunning(_)) => {}
        Err(e) => print_warning(&format!("Running instance did not reload hosts: {}", e)),
    }
}
