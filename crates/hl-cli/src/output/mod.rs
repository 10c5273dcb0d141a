//! Output formatting utilities for the CLI
//!
//! Tables for sessions and hosts, a one-line tray status, and colored
//! status messages.

use crossterm::style::{Color, Stylize};
use tabled::{settings::Style, Table, Tabled};

use hl_core::{Host, Indicator, Status};

use crate::ipc::{ManagerStatus, SessionInfo};

/// Format the sessions of a running instance as an ASCII table
///
/// The active session is marked with `*`.
pub fn format_sessions(sessions: &[SessionInfo]) -> String {
    if sessions.is_empty() {
        return "No hosts configured".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "")]
        active: &'static str,
        #[tabled(rename = "HOST")]
        title: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "STATE")]
        state: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            active: if s.active { "*" } else { "" },
            title: s.host.title.clone(),
            address: s.host.address.clone(),
            state: s.state.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the configured host list as an ASCII table
pub fn format_hosts(hosts: &[Host]) -> String {
    if hosts.is_empty() {
        return "No hosts configured".to_string();
    }

    #[derive(Tabled)]
    struct HostRow {
        #[tabled(rename = "#")]
        position: usize,
        #[tabled(rename = "HOST")]
        title: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "USER")]
        username: String,
        #[tabled(rename = "CREDENTIAL")]
        credential: &'static str,
    }

    let rows: Vec<HostRow> = hosts
        .iter()
        .enumerate()
        .map(|(i, h)| HostRow {
            position: i + 1,
            title: h.title.clone(),
            address: h.address.clone(),
            username: h.username.clone().unwrap_or_else(|| "-".to_string()),
            credential: if h.credential.is_some() { "yes" } else { "no" },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a manager snapshot: the tray line followed by the session table
pub fn format_status(status: &ManagerStatus) -> String {
    let active = match status.active() {
        Some(session) => format!(" ({})", session.host.title),
        None => String::new(),
    };

    format!(
        "{} {}{}\n{}",
        indicator(status.status),
        status.status,
        active,
        format_sessions(&status.sessions)
    )
}

/// Colored dot for the tray indicator of `status`
fn indicator(status: Status) -> String {
    let color = match status.indicator() {
        Indicator::Online => Color::Green,
        Indicator::Offline => Color::Red,
        Indicator::Busy => Color::Yellow,
    };
    "●".with(color).to_string()
}

fn print_styled(prefix: &str, color: Color, msg: &str, to_stderr: bool) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    if to_stderr {
        let mut stderr = std::io::stderr();
        let _ = crossterm::execute!(
            stderr,
            SetForegroundColor(color),
            Print(prefix),
            ResetColor,
            Print(msg),
            Print("\n")
        );
    } else {
        let mut stdout = std::io::stdout();
        let _ = crossterm::execute!(
            stdout,
            SetForegroundColor(color),
            Print(prefix),
            ResetColor,
            Print(msg),
            Print("\n")
        );
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_styled("✓ ", Color::Green, msg, false);
}

/// Print an error message in red with an X prefix (stderr)
pub fn print_error(msg: &str) {
    print_styled("✗ ", Color::Red, msg, true);
}

/// Print a warning message in yellow (stderr)
pub fn print_warning(msg: &str) {
    print_styled("⚠ ", Color::Yellow, msg, true);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_styled("ℹ ", Color::Cyan, msg, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_core::{ConnectionState, FailureCause, SessionId};

    fn session(title: &str, state: ConnectionState, active: bool) -> SessionInfo {
        SessionInfo {
            id: SessionId::new(),
            host: Host::new(title, format!("{}.example", title.to_lowercase())),
            state,
            active,
        }
    }

    #[test]
    fn test_empty_tables() {
        assert_eq!(format_sessions(&[]), "No hosts configured");
        assert_eq!(format_hosts(&[]), "No hosts configured");
    }

    #[test]
    fn test_session_table_shows_states() {
        let table = format_sessions(&[
            session("Work", ConnectionState::Online, true),
            session(
                "Home",
                ConnectionState::Error(FailureCause::UploadRejected),
                false,
            ),
        ]);
        assert!(table.contains("work.example"));
        assert!(table.contains("online"));
        assert!(table.contains("error (upload-rejected)"));
    }

    #[test]
    fn test_status_names_active_host() {
        let status = ManagerStatus {
            status: Status::UploadingSshKey,
            sessions: vec![session("Work", ConnectionState::UploadingSshKey, true)],
        };
        let text = format_status(&status);
        assert!(text.contains("uploading-ssh-key (Work)"));
    }

    #[test]
    fn test_host_table_hides_credential() {
        let mut host = Host::new("Work", "work.example");
        host.credential = Some("secret-token".to_string());
        let table = format_hosts(&[host]);
        assert!(table.contains("yes"));
        assert!(!table.contains("secret-token"));
    }
}
