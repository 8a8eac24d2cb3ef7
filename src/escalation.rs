//! Detects privilege-escalation ("become") success markers or password
//! prompts on the child's stdout/stderr before the main [`crate::pump`]
//! loop takes over, and injects the escalation password.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, trace};

use crate::Error;

/// Capability hooks belonging to the caller's escalation policy, not to the
/// transport itself. The transport only ever treats these as string
/// predicates over accumulated buffers.
pub trait BecomePolicy: std::fmt::Debug {
    /// Whether `buf` contains the success marker written by the escalation
    /// wrapper once the password has been accepted (or none was needed).
    fn check_become_success(&self, buf: &[u8]) -> bool;

    /// Whether `buf` contains a recognizable password prompt.
    fn check_password_prompt(&self, buf: &[u8]) -> bool;

    /// Whether `buf` indicates the escalation password was rejected.
    fn check_incorrect_password(&self, buf: &[u8]) -> bool;
}

/// Default policy: matches the conventional Ansible-style
/// `BECOME-SUCCESS-<token>` marker, a caller-supplied prompt substring (or
/// a generic `password:`/`Password:` fallback), and the common
/// `sudo`/`su` rejection message.
#[derive(Debug, Clone)]
pub struct DefaultBecomePolicy {
    /// Probe substring identifying the password prompt, from
    /// [`crate::config::PlayContext::prompt`].
    pub prompt: Option<String>,
}

const SUCCESS_MARKER: &str = "BECOME-SUCCESS-";
const INCORRECT_MARKERS: [&str; 2] = ["Sorry, try again", "incorrect password"];

impl BecomePolicy for DefaultBecomePolicy {
    fn check_become_success(&self, buf: &[u8]) -> bool {
        contains(buf, SUCCESS_MARKER)
    }

    fn check_password_prompt(&self, buf: &[u8]) -> bool {
        match &self.prompt {
            Some(p) => contains(buf, p),
            None => contains(buf, "password:") || contains(buf, "Password:"),
        }
    }

    fn check_incorrect_password(&self, buf: &[u8]) -> bool {
        INCORRECT_MARKERS.iter().any(|m| contains(buf, m))
    }
}

fn contains(buf: &[u8], needle: &str) -> bool {
    let hay = String::from_utf8_lossy(buf);
    hay.contains(needle)
}

/// What the handshake observed before handing off to the main pump.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Stdout accumulated during the handshake; prefixed onto the main
    /// pump's stdout in the returned result.
    pub prefix_stdout: Vec<u8>,
    /// Stderr accumulated during the handshake; prefixed onto the main
    /// pump's stderr in the returned result.
    pub prefix_stderr: Vec<u8>,
    /// Whether a password prompt was seen and the password should now be
    /// written to the child's stdin.
    pub passprompt: bool,
}

/// Run the handshake loop against `child`'s stdout/stderr.
///
/// Each iteration resets its "did we read anything this iteration" state
/// explicitly rather than relying on a value surviving an untaken branch —
/// the source this is ported from has a documented bug here where a stale
/// `chunk` from a previous iteration could spuriously terminate the loop.
pub async fn run(
    child: &mut Child,
    policy: &dyn BecomePolicy,
    timeout: Duration,
) -> Result<HandshakeOutcome, Error> {
    let mut stdout = child.stdout.take().expect("stdout was piped");
    let mut stderr = child.stderr.take().expect("stderr was piped");

    let mut stdout_accum = Vec::new();
    let mut stderr_accum = Vec::new();
    let mut passprompt = false;

    loop {
        let buf = [stdout_accum.as_slice(), stderr_accum.as_slice()].concat();
        if policy.check_become_success(&buf) {
            debug!("become success marker observed");
            break;
        }
        if policy.check_password_prompt(&stdout_accum) || policy.check_password_prompt(&stderr_accum) {
            debug!("password prompt observed");
            passprompt = true;
            break;
        }

        let mut stdout_buf = [0u8; 4096];
        let mut stderr_buf = [0u8; 4096];

        let read_result = tokio_timeout(timeout, async {
            tokio::select! {
                r = stderr.read(&mut stderr_buf) => (Stream::Stderr, r),
                r = stdout.read(&mut stdout_buf) => (Stream::Stdout, r),
            }
        })
        .await;

        let (stream, read) = match read_result {
            Ok(pair) => pair,
            Err(_elapsed) => {
                return Err(Error::Connect(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "timeout waiting for escalation prompt; output so far: {}",
                        String::from_utf8_lossy(&stdout_accum)
                    ),
                )));
            }
        };

        let n = read.map_err(Error::Io)?;
        if n == 0 {
            trace!(?stream, "eof before success marker or prompt; deferring to exit code");
            break;
        }

        match stream {
            Stream::Stderr => {
                stderr_accum.extend_from_slice(&stderr_buf[..n]);
                if policy.check_incorrect_password(&stderr_accum) {
                    return Err(Error::Auth("incorrect privilege escalation password".to_owned()));
                }
            }
            Stream::Stdout => {
                stdout_accum.extend_from_slice(&stdout_buf[..n]);
            }
        }
    }

    child.stdout = Some(stdout);
    child.stderr = Some(stderr);

    Ok(HandshakeOutcome {
        prefix_stdout: stdout_accum,
        prefix_stderr: stderr_accum,
        passprompt,
    })
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}
