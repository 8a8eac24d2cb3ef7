//! SSH remote-execution transport (**only works on unix**).
//!
//! This crate wraps the OpenSSH client (`ssh` on most machines, plus `scp`,
//! `sftp`, and optionally `sshpass`) to run commands and move files on
//! managed hosts for a configuration-management engine. Since all commands
//! are executed through the `ssh` command, all your existing configuration
//! (e.g., in `.ssh/config`) continues to work as expected.
//!
//! # Composing a connection
//!
//! A [`Connection`] is built from a [`PlayContext`] (per-task connection
//! parameters), [`HostVars`] (per-host overrides read once), and a
//! [`GlobalConfig`] (process-wide defaults, injected rather than a global
//! singleton so tests can vary it per case):
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), ssh_escalate::Error> {
//! use ssh_escalate::{Connection, GlobalConfig, HostVars, PlayContext};
//!
//! let play = PlayContext {
//!     remote_addr: "example.com".to_owned(),
//!     ..Default::default()
//! };
//! let mut conn = Connection::new(play, HostVars::default(), GlobalConfig::default());
//! let out = conn.exec_command("echo hi", None, false).await?;
//! assert_eq!(out.status, 0);
//! # Ok(()) }
//! ```
//!
//! # Privilege escalation
//!
//! When `PlayContext::become_` is set and a `prompt` probe is configured,
//! [`Connection::exec_command`] runs the escalation handshake
//! ([`escalation`]) before the main stdio pump ([`pump`]): it watches for a
//! success marker or a password prompt on stdout/stderr, and either hands
//! off silently or writes `become_pass` to the child's stdin.
//!
//! # Authentication
//!
//! Password authentication is supported by delegating to `sshpass` over an
//! anonymous pipe side-channel (see [`process::ProcessLauncher`]); when no
//! password is configured, the composed ssh arguments explicitly restrict
//! authentication to non-interactive methods (GSSAPI, hostbased,
//! publickey), so a misconfigured host never silently blocks on a tty
//! prompt this crate cannot see.
//!
//! # Errors
//!
//! Since we are wrapping `ssh`, which in turn runs a remote command we do
//! not control, we cannot always reliably tell the difference between a
//! failure of the SSH transport and a program error on the remote host. We
//! do our best with some heuristics (`ssh` exiting 255 on transport
//! failure, particular stderr substrings), but see [`Error`] for the full
//! set of distinguished failure kinds and [`Error::is_retryable`] for which
//! of them [`retry::retry`] will retry.
//!
//! # File transfer
//!
//! [`Connection::put_file`] and [`Connection::fetch_file`] select between
//! `scp` and `sftp` per [`GlobalConfig::default_scp_if_ssh`], and both
//! bracket the remote host unconditionally (`[host]:path`) since IPv6
//! literals require it and hostnames/IPv4 literals tolerate it.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(unix))]
compile_error!("This crate can only be used on unix");

pub mod add_host;
pub mod arg_builder;
pub mod config;
pub mod connection;
pub mod error;
pub mod escalation;
pub(crate) mod escape;
pub mod process;
pub mod pty;
pub mod pump;
pub mod retry;
pub mod transfer;

pub use add_host::{add_host, AddHostArgs, AddHostError, AddHostResult};
pub use arg_builder::ArgBuilder;
pub use config::{GlobalConfig, HostVars, PlayContext};
pub use connection::{Connection, ExecOutput};
pub use error::Error;
pub use escalation::{BecomePolicy, DefaultBecomePolicy};
pub use process::ProcessLauncher;
