//! Non-blocking, select-driven drain of a child's stdout/stderr until it
//! exits, with escalation-prompt monitoring layered on top of the normal
//! drain.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::time::sleep;
use tracing::trace;

use crate::escalation::BecomePolicy;
use crate::process::StdinSink;
use crate::Error;

const READ_CHUNK: usize = 9000;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Output accumulated by [`pump`], prefixed with whatever the escalation
/// handshake (if any) had already accumulated.
#[derive(Debug)]
pub struct PumpOutput {
    /// Process exit status, if the child could be waited on.
    pub status: i32,
    /// Combined stdout.
    pub stdout: Vec<u8>,
    /// Combined stderr.
    pub stderr: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Readable,
    TimedOut,
}

/// Drive `child`'s stdout/stderr to completion.
///
/// `in_data`, if present, is written to `stdin` and the sink closed before
/// polling begins. `become_pass`/`policy` let the pump keep watching for a
/// late incorrect-password message even after the handshake handed off
/// (some escalation wrappers re-prompt on a slow first attempt).
pub async fn pump(
    mut child: Child,
    stdin: Option<StdinSink>,
    in_data: Option<&[u8]>,
    mut stdout_accum: Vec<u8>,
    mut stderr_accum: Vec<u8>,
    become_pass: Option<&str>,
    policy: Option<&dyn BecomePolicy>,
) -> Result<PumpOutput, Error> {
    if let Some(sink) = stdin {
        match in_data {
            Some(data) => sink.write_all_and_close(data).await?,
            None => sink.close().await?,
        }
    }

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    loop {
        if stdout.is_none() && stderr.is_none() {
            break;
        }

        let mut stderr_buf = [0u8; READ_CHUNK];
        let mut stdout_buf = [0u8; READ_CHUNK];

        let (which, readiness) = match (&mut stdout, &mut stderr) {
            (Some(so), Some(se)) => {
                tokio::select! {
                    biased;
                    r = se.read(&mut stderr_buf) => (Which::Stderr(r), Readiness::Readable),
                    r = so.read(&mut stdout_buf) => (Which::Stdout(r), Readiness::Readable),
                    _ = sleep(POLL_INTERVAL) => (Which::None, Readiness::TimedOut),
                }
            }
            (None, Some(se)) => {
                tokio::select! {
                    r = se.read(&mut stderr_buf) => (Which::Stderr(r), Readiness::Readable),
                    _ = sleep(POLL_INTERVAL) => (Which::None, Readiness::TimedOut),
                }
            }
            (Some(so), None) => {
                tokio::select! {
                    r = so.read(&mut stdout_buf) => (Which::Stdout(r), Readiness::Readable),
                    _ = sleep(POLL_INTERVAL) => (Which::None, Readiness::TimedOut),
                }
            }
            (None, None) => unreachable!("checked above"),
        };

        match which {
            Which::Stderr(r) => {
                let n = r.map_err(Error::Io)?;
                if n == 0 {
                    stderr = None;
                } else {
                    stderr_accum.extend_from_slice(&stderr_buf[..n]);
                    check_prompts(&stderr_accum, become_pass, policy)?;
                }
            }
            Which::Stdout(r) => {
                let n = r.map_err(Error::Io)?;
                if n == 0 {
                    stdout = None;
                } else {
                    stdout_accum.extend_from_slice(&stdout_buf[..n]);
                    check_prompts(&stdout_accum, become_pass, policy)?;
                }
            }
            Which::None => {}
        }

        // Both streams at EOF: nothing left for select to do, whether or
        // not the process has exited yet — fall through to `wait` below.
        if stdout.is_none() && stderr.is_none() {
            break;
        }
        // A bare timeout with nothing ready only ends the loop once the
        // process has also exited; otherwise keep polling.
        if readiness == Readiness::TimedOut && child.try_wait().map_err(Error::Io)?.is_some() {
            break;
        }
    }

    trace!("stdio drained, waiting for process exit");
    let status = child.wait().await.map_err(Error::Io)?;
    let code = status.code().unwrap_or(-1);

    Ok(PumpOutput {
        status: code,
        stdout: stdout_accum,
        stderr: stderr_accum,
    })
}

enum Which {
    Stdout(std::io::Result<usize>),
    Stderr(std::io::Result<usize>),
    None,
}

fn check_prompts(
    accum: &[u8],
    become_pass: Option<&str>,
    policy: Option<&dyn BecomePolicy>,
) -> Result<(), Error> {
    let Some(policy) = policy else {
        return Ok(());
    };
    if policy.check_incorrect_password(accum) {
        return Err(Error::Auth(
            "incorrect privilege escalation password".to_owned(),
        ));
    }
    if become_pass.is_none() && policy.check_password_prompt(accum) {
        return Err(Error::Auth(
            "missing privilege escalation password".to_owned(),
        ));
    }
    Ok(())
}
