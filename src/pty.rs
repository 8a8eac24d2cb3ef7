//! Pseudo-terminal allocation for the stdin side of a launched process.
//!
//! Some remote shells refuse a non-tty stdin, but piping module payloads
//! into a remote interpreter in tty mode triggers interactive-mode line
//! parsing (see [`crate::process::ProcessLauncher`]). [`ProcessLauncher`]
//! picks pty vs. pipe per invocation depending on whether there is data to
//! pipe; this module only does the allocation and wraps the master side as
//! an async sink, falling back transparently if the platform refuses ptys.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use nix::pty::{openpty, OpenptyResult};
use tokio::io::unix::AsyncFd;
use tokio::io::AsyncWrite;
use std::pin::Pin;
use std::task::{Context, Poll};

/// An allocated pty pair: the slave fd is handed to the child as stdin, the
/// master fd is kept by the parent as a write sink.
#[derive(Debug)]
pub struct Pty {
    /// Async write handle to the pty master, used by the parent to feed
    /// the escalation password or pipelined input.
    pub master: PtyMaster,

    /// The pty slave, to be passed as the child's stdin.
    pub slave: File,
}

/// Async write wrapper around a pty master fd.
#[derive(Debug)]
pub struct PtyMaster {
    inner: AsyncFd<File>,
}

impl AsyncWrite for PtyMaster {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let mut guard = match this.inner.poll_write_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| io::Write::write(&mut inner.get_ref(), buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Attempt to allocate a pty pair. Callers fall back to a plain pipe when
/// this returns `Err` — pty allocation is known to fail on some platforms
/// and in some containers lacking `/dev/ptmx`.
pub fn allocate() -> io::Result<Pty> {
    let OpenptyResult { master, slave } = openpty(None, None).map_err(nix_to_io)?;

    let master_file = File::from(master);
    set_nonblocking(&master_file)?;
    let slave_file = File::from(slave);

    Ok(Pty {
        master: PtyMaster {
            inner: AsyncFd::new(master_file)?,
        },
        slave: slave_file,
    })
}

fn set_nonblocking(f: &File) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let fd = f.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(nix_to_io)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(nix_to_io)?;
    Ok(())
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
