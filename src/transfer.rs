//! `put_file`/`fetch_file`: `scp`/`sftp`-backed file transfer, composing
//! [`crate::process::ProcessLauncher`] and [`crate::pump`].

use std::path::Path;

use tracing::trace;

use crate::connection::Connection;
use crate::escape::escape;
use crate::process::ProcessLauncher;
use crate::pump::{self, PumpOutput};
use crate::Error;

impl Connection {
    /// Upload `local` to `remote` on the connected host.
    ///
    /// Fails with [`Error::FileNotFound`] without spawning a child if
    /// `local` does not exist.
    pub async fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), Error> {
        self.connect()?;
        if !local.is_file() {
            return Err(Error::FileNotFound(local.to_owned()));
        }

        let host_token = bracket_if_ipv6(&self.remote_addr());
        let (argv, in_data) = if self.default_scp_if_ssh() {
            let mut argv = vec![self.scp_bin()];
            argv.extend(self.common_args_vec());
            argv.push(local.to_string_lossy().into_owned());
            argv.push(format!("{host_token}:{}", escape_str(remote)));
            (argv, None)
        } else {
            let mut argv = vec![self.sftp_bin()];
            argv.extend(self.common_args_vec());
            argv.push(host_token);
            let script = format!("put {} {}\n", escape_str(&local.to_string_lossy()), escape_str(remote));
            (argv, Some(script))
        };

        self.run_transfer(argv, in_data).await
    }

    /// Download `remote` on the connected host to `local`.
    pub async fn fetch_file(&mut self, remote: &str, local: &Path) -> Result<(), Error> {
        self.connect()?;

        let host_token = bracket_if_ipv6(&self.remote_addr());
        let (argv, in_data) = if self.default_scp_if_ssh() {
            let mut argv = vec![self.scp_bin()];
            argv.extend(self.common_args_vec());
            argv.push(format!("{host_token}:{}", escape_str(remote)));
            argv.push(local.to_string_lossy().into_owned());
            (argv, None)
        } else {
            let mut argv = vec![self.sftp_bin()];
            if self.default_sftp_batch_mode() {
                argv.push("-b".to_owned());
                argv.push("-".to_owned());
            }
            argv.extend(self.common_args_vec());
            argv.push(host_token);
            let script = format!(
                "get {} {}\n",
                escape_str(remote),
                escape_str(&local.to_string_lossy())
            );
            (argv, Some(script))
        };

        self.run_transfer(argv, in_data).await
    }

    async fn run_transfer(&self, mut argv: Vec<String>, in_data: Option<String>) -> Result<(), Error> {
        let launcher = ProcessLauncher::new(self.global_config());
        let password_fds = launcher.password_cmd(&mut argv, self.password())?;

        trace!(?argv, "launching transfer child");
        let launch = launcher.run(&argv, in_data.is_some())?;

        if let Some(fds) = password_fds {
            ProcessLauncher::send_password(fds, self.password().expect("password present"))?;
        }

        let PumpOutput {
            status,
            stdout,
            stderr,
        } = pump::pump(
            launch.child,
            Some(launch.stdin),
            in_data.as_deref().map(str::as_bytes),
            Vec::new(),
            Vec::new(),
            None,
            None,
        )
        .await?;

        if status != 0 {
            return Err(Error::Transfer {
                status: Some(status),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        Ok(())
    }
}

fn escape_str(s: &str) -> String {
    use std::ffi::OsStr;
    escape(OsStr::new(s)).to_string_lossy().into_owned()
}

/// IPv6 literals require the `[host]:path` bracket form; hostnames and
/// IPv4 literals tolerate it too, so it is applied unconditionally rather
/// than special-cased per address family.
fn bracket_if_ipv6(addr: &str) -> String {
    format!("[{addr}]")
}
