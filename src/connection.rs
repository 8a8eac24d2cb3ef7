//! The `Connection` facade: one per host per task batch, composing
//! [`crate::arg_builder`], [`crate::process`], [`crate::escalation`],
//! [`crate::pump`], and [`crate::retry`] into `exec_command` and the file
//! transfer operations.

use std::time::Duration;

use tracing::{debug, trace};

use crate::arg_builder::ArgBuilder;
use crate::config::{GlobalConfig, HostVars, PlayContext};
use crate::escalation::{self, BecomePolicy, DefaultBecomePolicy};
use crate::process::ProcessLauncher;
use crate::pump::{self, PumpOutput};
use crate::retry::{self, AttemptOutcome};
use crate::Error;

/// Output of a remote command, matching the transport's historical return
/// shape: the second slot is a reserved field, kept empty, preserved for
/// caller compatibility with code that destructures a 4-tuple.
#[derive(Debug)]
pub struct ExecOutput {
    /// Exit status of the remote command (or of `ssh` itself on transport
    /// failure).
    pub status: i32,
    /// Reserved; always empty.
    pub reserved: String,
    /// Captured stdout, including any escalation-handshake prefix.
    pub stdout: Vec<u8>,
    /// Captured stderr, including any escalation-handshake prefix.
    pub stderr: Vec<u8>,
}

/// One SSH connection to one host, composed once and reused across
/// `exec_command`/`put_file`/`fetch_file` calls for the lifetime of a task
/// batch.
///
/// Not `Clone`, not `Sync`: drive multiple hosts by giving each its own
/// `Connection` on its own task, never by sharing one across tasks.
pub struct Connection {
    play: PlayContext,
    host_vars: HostVars,
    config: GlobalConfig,
    policy: Box<dyn BecomePolicy + Send + Sync>,
    common_args: Vec<String>,
    connected: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.play.remote_addr)
            .field("connected", &self.connected)
            .field("common_args", &self.common_args)
            .finish()
    }
}

impl Connection {
    /// Construct a connection for `play` against `host_vars`/`config`,
    /// using the default become-prompt policy.
    pub fn new(play: PlayContext, host_vars: HostVars, config: GlobalConfig) -> Self {
        let policy = DefaultBecomePolicy {
            prompt: play.prompt.clone(),
        };
        Connection::with_policy(play, host_vars, config, Box::new(policy))
    }

    /// Construct a connection with a caller-supplied escalation policy,
    /// for callers whose become-prompt detection differs from the default
    /// substring matcher.
    pub fn with_policy(
        play: PlayContext,
        host_vars: HostVars,
        config: GlobalConfig,
        policy: Box<dyn BecomePolicy + Send + Sync>,
    ) -> Self {
        Connection {
            play,
            host_vars,
            config,
            policy,
            common_args: Vec::new(),
            connected: false,
        }
    }

    /// Compose `common_args` if not already connected. Idempotent.
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.connected {
            return Ok(());
        }
        let effective_user = effective_user();
        let built = ArgBuilder::build(&self.play, &self.host_vars, &self.config, &effective_user)?;
        self.common_args = built.into_args();
        self.connected = true;
        debug!(host = %self.play.remote_addr, "connection established");
        Ok(())
    }

    pub(crate) fn remote_addr(&self) -> String {
        self.play.remote_addr.clone()
    }

    pub(crate) fn common_args_vec(&self) -> Vec<String> {
        self.common_args.clone()
    }

    pub(crate) fn scp_bin(&self) -> String {
        self.config.scp_bin.clone()
    }

    pub(crate) fn sftp_bin(&self) -> String {
        self.config.sftp_bin.clone()
    }

    pub(crate) fn default_scp_if_ssh(&self) -> bool {
        self.config.default_scp_if_ssh
    }

    pub(crate) fn default_sftp_batch_mode(&self) -> bool {
        self.config.default_sftp_batch_mode
    }

    pub(crate) fn global_config(&self) -> &GlobalConfig {
        &self.config
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.play.password.as_deref()
    }

    /// A hook to serialize the initial known-hosts prompt across workers
    /// targeting the same host. Deferred: this is currently a no-op, same
    /// as upstream.
    pub fn lock_host_keys(&self, _lock: bool) {}

    /// Release local connection state. Deliberately a no-op on the
    /// multiplex master itself: explicit `ssh -O stop` is withheld until
    /// the orchestration layer can guarantee no peer task still depends on
    /// the shared control socket.
    pub fn close(&mut self) {
        self.connected = false;
    }

    /// Run `cmd` on the remote host, retrying transport failures per
    /// `ANSIBLE_SSH_RETRIES`.
    pub async fn exec_command(
        &mut self,
        cmd: &str,
        in_data: Option<&[u8]>,
        sudoable: bool,
    ) -> Result<ExecOutput, Error> {
        self.connect()?;
        let retries = self.config.ansible_ssh_retries;

        let outcome = retry::retry(retries, || self.exec_command_once(cmd, in_data, sudoable)).await?;
        let AttemptOutcome { status, payload } = outcome;

        Ok(ExecOutput {
            status,
            reserved: String::new(),
            stdout: payload.0,
            stderr: payload.1,
        })
    }

    async fn exec_command_once(
        &self,
        cmd: &str,
        in_data: Option<&[u8]>,
        sudoable: bool,
    ) -> Result<AttemptOutcome<(Vec<u8>, Vec<u8>)>, Error> {
        let mut argv = vec![self.config.ssh_bin.clone(), "-C".to_owned()];
        if in_data.is_none() {
            argv.push("-tt".to_owned());
        }
        argv.push(if self.play.verbosity > 3 { "-vvv".to_owned() } else { "-q".to_owned() });
        argv.extend(self.common_args.iter().cloned());
        argv.push(self.play.remote_addr.clone());
        argv.push(cmd.to_owned());

        let launcher = ProcessLauncher::new(&self.config);
        let password_fds = launcher.password_cmd(&mut argv, self.play.password.as_deref())?;
        let used_sshpass = password_fds.is_some();

        trace!(?argv, "launching ssh child");
        let mut launch = launcher.run(&argv, in_data.is_some())?;

        if let Some(fds) = password_fds {
            crate::process::ProcessLauncher::send_password(
                fds,
                self.play.password.as_deref().expect("password present"),
            )?;
        }

        let escalate = sudoable && self.play.become_ && self.play.prompt.is_some();
        let (prefix_stdout, prefix_stderr, stdin) = if escalate {
            let outcome = escalation::run(&mut launch.child, self.policy.as_ref(), self.play.timeout).await?;
            let stdin = if outcome.passprompt {
                let password = self.play.become_pass.as_deref().ok_or_else(|| {
                    Error::Auth(format!(
                        "missing {} password",
                        self.play.become_method.as_deref().unwrap_or("become")
                    ))
                })?;
                launch
                    .stdin
                    .write_all_and_close(format!("{password}\n").as_bytes())
                    .await?;
                None
            } else {
                Some(launch.stdin)
            };
            (outcome.prefix_stdout, outcome.prefix_stderr, stdin)
        } else {
            (Vec::new(), Vec::new(), Some(launch.stdin))
        };

        let PumpOutput { status, stdout, stderr } = pump::pump(
            launch.child,
            stdin,
            in_data,
            prefix_stdout,
            prefix_stderr,
            self.play.become_pass.as_deref(),
            escalate.then_some(self.policy.as_ref()),
        )
        .await?;

        let stderr_text = String::from_utf8_lossy(&stderr);

        if self.config.host_key_checking && used_sshpass && status == 6 {
            return Err(Error::HostKey(
                "using a SSH password instead of a key is not possible because host key \
                 checking is enabled and sshpass does not support this; add this host's \
                 fingerprint to known_hosts to manage it"
                    .to_owned(),
            ));
        }

        let control_persist_error = stderr_text.contains("Bad configuration option: ControlPersist")
            || stderr_text.contains("unknown configuration option: ControlPersist");
        if status != 0 && control_persist_error {
            return Err(Error::Configuration(
                "this ssh version may not support ControlPersist; set ansible_ssh_args to \
                 disable it and try again"
                    .to_owned(),
            ));
        }

        if status == 255 {
            return Err(Error::interpret_ssh_error(&stderr_text));
        }

        Ok(AttemptOutcome {
            status,
            payload: (stdout, stderr),
        })
    }
}

fn effective_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "root".to_owned())
}

/// Connect timeout helper kept at the module level so callers that build a
/// `PlayContext` without an explicit timeout get the same default ssh
/// would otherwise negotiate.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
