//! Status command implementation

use anyhow::Result;

use super::CliContext;
use crate::ipc::ClientError;
use crate::output::{format_hosts, format_status, print_warning};

/// Execute the status command
///
/// With no running instance, shows the configured hosts instead.
pub async fn status_command(ctx: &CliContext) -> Result<()> {
    let mut client = ctx.client()?;

    match client.status().await {
        Ok(status) => {
            println!("{}", format_status(&status));
            Ok(())
        }
        Err(ClientError::NotRunning(address)) => {
            print_warning(&format!("hostlink is not running ({})", address));
            let hosts = ctx.load_config()?.hosts;
            println!("{}", format_hosts(&hosts));
            Ok(())
        }
        Err(e) => Err(super::report("get status", e)),
    }
}
