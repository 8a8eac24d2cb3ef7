//! Connection parameters and process-wide defaults.
//!
//! [`PlayContext`] and [`HostVars`] are supplied by the caller once per task;
//! [`GlobalConfig`] is loaded once per process and never mutated afterwards.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

/// Per-task connection parameters supplied by the caller.
///
/// This is read-only to the transport: [`crate::Connection`] only ever reads
/// from it while composing arguments, it never writes back.
#[derive(Debug, Clone, Default)]
pub struct PlayContext {
    /// Address of the remote host, as given on the command line or by
    /// inventory (may be a hostname, IPv4 literal, or IPv6 literal).
    pub remote_addr: String,

    /// Remote user to authenticate as, if different from the local user.
    pub remote_user: Option<String>,

    /// Remote port, if not the default 22.
    pub port: Option<u16>,

    /// Password used for `sshpass`-mediated authentication.
    pub password: Option<String>,

    /// Path to a private key file to pass via `IdentityFile`.
    pub private_key_file: Option<String>,

    /// Connect timeout, in whole seconds, passed as `ConnectTimeout`.
    pub timeout: Duration,

    /// Verbosity level; `> 3` selects `-vvv`, otherwise `-q` is used.
    pub verbosity: u8,

    /// Extra ssh arguments supplied on the command line (highest
    /// precedence for step 9 of [`crate::ArgBuilder`]).
    pub ssh_extra_args: Option<String>,

    /// Whether privilege escalation ("become") is requested for this task.
    pub become_: bool,

    /// Name of the escalation method in use (`"sudo"`, `"su"`, ...).
    pub become_method: Option<String>,

    /// Password for the escalation prompt, distinct from `password`.
    pub become_pass: Option<String>,

    /// A probe string identifying the escalation password prompt, used by
    /// the default [`crate::escalation::BecomePolicy`] implementation.
    pub prompt: Option<String>,
}

/// Per-host variable overrides, consulted once when a [`crate::Connection`]
/// is constructed.
#[derive(Debug, Clone, Default)]
pub struct HostVars {
    /// Overrides the global base ssh args (`ansible_ssh_args`).
    pub ansible_ssh_args: Option<String>,

    /// Overrides the per-task extra ssh args (`ansible_ssh_extra_args`).
    pub ansible_ssh_extra_args: Option<String>,

    /// Arbitrary additional host variables, as supplied to `add_host`.
    ///
    /// Modeled as a dynamic bag since the orchestration layer that feeds
    /// this transport allows scalars, nested mappings, and sequences as
    /// host variable values.
    pub vars: HashMap<String, Value>,
}

/// Process-wide configuration, loaded once and never mutated.
///
/// Keep this as an explicit, injectable record rather than a global
/// singleton: tests construct a fresh `GlobalConfig` per case, typically
/// pointing `ssh_bin`/`scp_bin`/`sftp_bin`/`sshpass_bin` at scripted
/// stand-ins.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Base ssh args used when no inventory override is present.
    pub ansible_ssh_args: String,

    /// `ControlPath` format string, with a `{directory}` placeholder.
    pub ansible_ssh_control_path: String,

    /// If `false`, `StrictHostKeyChecking=no` is appended.
    pub host_key_checking: bool,

    /// Retry budget; the transport attempts `ansible_ssh_retries + 1` times.
    pub ansible_ssh_retries: u32,

    /// Use `scp` instead of `sftp` for file transfer.
    pub default_scp_if_ssh: bool,

    /// Use `sftp -b -` (batch mode) for file transfer.
    pub default_sftp_batch_mode: bool,

    /// Escalation methods recognized by this transport (informational;
    /// the transport itself has no opinion on `become_method` beyond what
    /// the caller's [`crate::escalation::BecomePolicy`] implements).
    pub become_methods: Vec<String>,

    /// Path or bare name of the `ssh` executable.
    pub ssh_bin: String,

    /// Path or bare name of the `scp` executable.
    pub scp_bin: String,

    /// Path or bare name of the `sftp` executable.
    pub sftp_bin: String,

    /// Path or bare name of the `sshpass` executable.
    pub sshpass_bin: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            ansible_ssh_args: "-o ControlMaster=auto -o ControlPersist=60s".to_owned(),
            ansible_ssh_control_path: "{directory}/%h-%r".to_owned(),
            host_key_checking: true,
            ansible_ssh_retries: 0,
            default_scp_if_ssh: false,
            default_sftp_batch_mode: true,
            become_methods: vec![
                "sudo".to_owned(),
                "su".to_owned(),
                "pbrun".to_owned(),
                "pfexec".to_owned(),
                "doas".to_owned(),
                "dzdo".to_owned(),
                "ksu".to_owned(),
                "machinectl".to_owned(),
            ],
            ssh_bin: "ssh".to_owned(),
            scp_bin: "scp".to_owned(),
            sftp_bin: "sftp".to_owned(),
            sshpass_bin: "sshpass".to_owned(),
        }
    }
}
