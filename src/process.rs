//! Spawns the `ssh`/`scp`/`sftp` child with the right stdin discipline and
//! wires the `sshpass` password side-channel.

use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::process::Stdio as StdStdio;

use nix::unistd::pipe;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::GlobalConfig;
use crate::pty::{self, PtyMaster};
use crate::Error;

/// The write-and-close sink bound to the child's stdin, abstracting over
/// whether a pseudo-terminal or a plain pipe was used.
#[derive(Debug)]
pub enum StdinSink {
    /// A pty master fd; used when no `in_data` needs to be piped.
    Pty(PtyMaster),
    /// A plain pipe; used whenever `in_data` is present.
    Pipe(tokio::process::ChildStdin),
}

impl StdinSink {
    /// Write `data` then close the sink, surfacing any write failure as a
    /// transport error ("data could not be sent").
    pub async fn write_all_and_close(mut self, data: &[u8]) -> Result<(), Error> {
        let result: io::Result<()> = match &mut self {
            StdinSink::Pty(m) => m.write_all(data).await,
            StdinSink::Pipe(p) => p.write_all(data).await,
        };
        result.map_err(Error::Connect)?;
        self.close().await
    }

    /// Close the sink without writing anything.
    pub async fn close(self) -> Result<(), Error> {
        match self {
            StdinSink::Pty(mut m) => m.shutdown().await.map_err(Error::Connect),
            StdinSink::Pipe(mut p) => p.shutdown().await.map_err(Error::Connect),
        }
    }
}

/// The anonymous pipe used as the `sshpass` side channel for one command
/// invocation. Both ends are closed deterministically on every path.
#[derive(Debug)]
pub struct PasswordFds {
    read_fd: OwnedFd,
    write_fd: OwnedFd,
}

/// Result of launching a child process.
#[derive(Debug)]
pub struct Launch {
    /// Handle to the spawned child.
    pub child: Child,
    /// Sink bound to the child's stdin.
    pub stdin: StdinSink,
}

/// Spawns `ssh`/`scp`/`sftp` children and wires their stdin.
#[derive(Debug)]
pub struct ProcessLauncher<'a> {
    config: &'a GlobalConfig,
}

impl<'a> ProcessLauncher<'a> {
    /// Construct a launcher bound to `config` (for executable path lookup).
    pub fn new(config: &'a GlobalConfig) -> Self {
        ProcessLauncher { config }
    }

    /// If `play_password` is set, probe for `sshpass` and prepend
    /// `["sshpass", "-d<fd>"]` to `argv`, returning the [`PasswordFds`] to
    /// be passed to [`ProcessLauncher::send_password`] after spawn.
    pub fn password_cmd(
        &self,
        argv: &mut Vec<String>,
        play_password: Option<&str>,
    ) -> Result<Option<PasswordFds>, Error> {
        if play_password.is_none() {
            return Ok(None);
        }

        which(&self.config.sshpass_bin).ok_or_else(|| {
            Error::Configuration(format!(
                "to use password authentication, you must install the {} program",
                self.config.sshpass_bin
            ))
        })?;

        let (read_fd, write_fd) = pipe().map_err(|e| {
            Error::Configuration(format!("could not allocate password pipe: {e}"))
        })?;

        let mut prefix = vec![
            self.config.sshpass_bin.clone(),
            format!("-d{}", read_fd.as_raw_fd()),
        ];
        prefix.append(argv);
        *argv = prefix;

        Ok(Some(PasswordFds { read_fd, write_fd }))
    }

    /// After spawn: close the read fd on the parent side, write
    /// `password\n` to the write fd, then close the write fd.
    ///
    /// Order matters — the read fd must be closed on the parent's side
    /// before writing, so that the child (which inherited it across
    /// `spawn`) is the sole remaining reader.
    pub fn send_password(fds: PasswordFds, password: &str) -> Result<(), Error> {
        drop(fds.read_fd);

        let mut write_end = std::fs::File::from(fds.write_fd);
        write_end
            .write_all(format!("{password}\n").as_bytes())
            .map_err(Error::Io)?;
        drop(write_end);

        Ok(())
    }

    /// Spawn `argv[0]` with `argv[1..]` as arguments. If `has_in_data` is
    /// true, stdin is a plain pipe; otherwise a pty is attempted first,
    /// falling back transparently to a pipe on allocation failure.
    pub fn run(&self, argv: &[String], has_in_data: bool) -> Result<Launch, Error> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdout(StdStdio::piped());
        cmd.stderr(StdStdio::piped());

        if has_in_data {
            cmd.stdin(StdStdio::piped());
            let mut child = cmd.spawn().map_err(Error::Spawn)?;
            let stdin = child.stdin.take().expect("stdin was piped");
            debug!(argv0 = %argv[0], "spawned child with piped stdin");
            return Ok(Launch {
                child,
                stdin: StdinSink::Pipe(stdin),
            });
        }

        match pty::allocate() {
            Ok(pty) => {
                let slave_fd = pty.slave.as_raw_fd();
                // Safety: `slave_fd` stays open and valid for the duration of
                // `spawn`, which duplicates it into the child before returning.
                cmd.stdin(unsafe { StdStdio::from_raw_fd(slave_fd) });
                std::mem::forget(pty.slave);
                let child = cmd.spawn().map_err(Error::Spawn)?;
                debug!(argv0 = %argv[0], "spawned child with pty stdin");
                Ok(Launch {
                    child,
                    stdin: StdinSink::Pty(pty.master),
                })
            }
            Err(e) => {
                warn!(error = %e, "pty allocation failed, falling back to pipe");
                cmd.stdin(StdStdio::piped());
                let mut child = cmd.spawn().map_err(Error::Spawn)?;
                let stdin = child.stdin.take().expect("stdin was piped");
                Ok(Launch {
                    child,
                    stdin: StdinSink::Pipe(stdin),
                })
            }
        }
    }
}

fn which(bin: &str) -> Option<std::path::PathBuf> {
    if bin.contains('/') {
        let p = std::path::Path::new(bin);
        return p.is_file().then(|| p.to_owned());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|candidate| candidate.is_file())
}
