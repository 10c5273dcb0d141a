//! hostlink: command-line front end for the session manager
//!
//! Provides the `hostlink` binary, which either runs the session manager
//! headless (`hostlink run`) or forwards commands to a running instance.

pub mod commands;
pub mod daemon;
pub mod ipc;
pub mod output;
