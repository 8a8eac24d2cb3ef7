//! The error type shared by every fallible operation in this crate.

use std::fmt;
use std::io;

/// Errors produced while composing arguments, launching `ssh`/`scp`/`sftp`,
/// or pumping their stdio.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The ControlPath directory could not be created or made writable, or
    /// `ControlPersist` was requested but rejected by the local `ssh`
    /// client, or `sshpass` is unavailable although a password was given.
    Configuration(String),

    /// The `ssh` (or `sshpass`) child could not even be spawned.
    Spawn(io::Error),

    /// A write to the child's stdin failed, the child exited with status
    /// 255 after retries were exhausted, or the escalation handshake timed
    /// out waiting for a prompt.
    ///
    /// Retried by [`crate::retry::retry`] while attempts remain.
    Connect(io::Error),

    /// The connection to the remote host was severed mid-command.
    Disconnected,

    /// A privilege-escalation password was required but none was
    /// configured, or the configured password was rejected.
    Auth(String),

    /// `put_file`'s local source path does not exist.
    FileNotFound(std::path::PathBuf),

    /// `scp`/`sftp` exited non-zero while transferring a file.
    Transfer {
        /// Exit status of the transfer child, if it ran to completion.
        status: Option<i32>,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },

    /// Host-key verification failed (`sshpass` exit code 6 with host-key
    /// checking enabled); the fingerprint must be pre-trusted.
    HostKey(String),

    /// I/O error while reading/writing the child's stdin/stdout/stderr.
    Io(io::Error),
}

impl Error {
    /// Heuristically classify `ssh`'s stderr into a connection [`Error`].
    ///
    /// This is error-prone by nature (we are scraping a human-readable
    /// message), but it is the best we can do without a native protocol
    /// implementation.
    pub(crate) fn interpret_ssh_error(stderr: &str) -> Self {
        let mut stderr = stderr.trim();
        if let Some(rest) = stderr.strip_prefix("ssh: ") {
            stderr = rest;
        }
        if stderr.starts_with("Warning: Permanently added ") {
            stderr = stderr.split_once("\r\n").map(|x| x.1).unwrap_or("");
        }

        let mut kind = io::ErrorKind::ConnectionAborted;
        let mut parts = stderr.splitn(2, ": ");
        if let Some(ssh_error) = parts.next() {
            if ssh_error.starts_with("Could not resolve") {
                kind = io::ErrorKind::Other;
            }

            if let Some(io_error) = parts.next() {
                match io_error {
                    "Network is unreachable" => kind = io::ErrorKind::Other,
                    "Connection refused" => kind = io::ErrorKind::ConnectionRefused,
                    e if ssh_error.starts_with("connect to host") && e == "Connection timed out" => {
                        kind = io::ErrorKind::TimedOut;
                    }
                    e if ssh_error.starts_with("connect to host") && e == "Operation timed out" => {
                        kind = io::ErrorKind::TimedOut;
                    }
                    e if ssh_error.starts_with("connect to host") && e == "Permission denied" => {
                        kind = io::ErrorKind::Other;
                    }
                    e if e.contains("Permission denied (") => {
                        kind = io::ErrorKind::PermissionDenied;
                    }
                    _ => {}
                }
            }
        }

        Error::Connect(io::Error::new(kind, stderr.to_owned()))
    }

    /// Whether [`crate::retry::retry`] should retry an attempt
    /// that failed with this error.
    ///
    /// Only transport-level failures are retryable. Configuration and
    /// authentication errors are fatal for the current task: retrying them
    /// would just fail the same way `ANSIBLE_SSH_RETRIES` times in a row.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Spawn(_) | Error::Connect(_) | Error::Disconnected
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Error::Spawn(_) => write!(f, "the local ssh command could not be executed"),
            Error::Connect(_) => write!(f, "failed to connect to the remote host"),
            Error::Disconnected => write!(f, "the connection was terminated"),
            Error::Auth(msg) => write!(f, "authentication error: {msg}"),
            Error::FileNotFound(path) => {
                write!(f, "local file not found: {}", path.display())
            }
            Error::Transfer {
                status, stderr, ..
            } => write!(f, "file transfer failed (status {status:?}): {stderr}"),
            Error::HostKey(msg) => write!(f, "host key error: {msg}"),
            Error::Io(_) => write!(f, "failure while accessing standard I/O of remote process"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Spawn(e) | Error::Connect(e) | Error::Io(e) => Some(e),
            Error::Configuration(_)
            | Error::Disconnected
            | Error::Auth(_)
            | Error::FileNotFound(_)
            | Error::Transfer { .. }
            | Error::HostKey(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error() {
        let err = "ssh: Warning: Permanently added \'login.csail.mit.edu,128.52.131.0\' (ECDSA) to the list of known hosts.\r\nopenssh-tester@login.csail.mit.edu: Permission denied (publickey,gssapi-keyex,gssapi-with-mic,password,keyboard-interactive).";
        let err = Error::interpret_ssh_error(err);
        let target = io::Error::new(io::ErrorKind::PermissionDenied, "openssh-tester@login.csail.mit.edu: Permission denied (publickey,gssapi-keyex,gssapi-with-mic,password,keyboard-interactive).");
        if let Error::Connect(e) = err {
            assert_eq!(e.kind(), target.kind());
            assert_eq!(format!("{}", e), format!("{}", target));
        } else {
            unreachable!("{:?}", err);
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Connect(io::Error::new(io::ErrorKind::Other, "x")).is_retryable());
        assert!(Error::Disconnected.is_retryable());
        assert!(!Error::Configuration("no cp dir".into()).is_retryable());
        assert!(!Error::Auth("missing password".into()).is_retryable());
        assert!(!Error::FileNotFound("/tmp/x".into()).is_retryable());
    }

    #[test]
    fn error_sanity() {
        use std::error::Error as _;

        let ioe = || io::Error::new(io::ErrorKind::Other, "test");

        let e = Error::Connect(ioe());
        assert!(!format!("{}", e).is_empty());
        assert!(e.source().is_some());

        let e = Error::Disconnected;
        assert!(!format!("{}", e).is_empty());
        assert!(e.source().is_none());

        let e = Error::HostKey("fingerprint mismatch".into());
        assert!(format!("{}", e).contains("fingerprint mismatch"));
    }
}
