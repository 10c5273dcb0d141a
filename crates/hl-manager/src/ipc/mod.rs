//! Localhost IPC server
//!
//! Lets the CLI and second instances drive the running session manager.

mod server;

pub use server::IpcServer;
