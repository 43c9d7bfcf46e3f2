// child process transport: stdin/stdout of a spawned peer as one duplex stream
use crate::lsp::error::Error;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

/// A running peer process. Reads come from its stdout, writes go to its
/// stdin. Bytes pass through untouched.
pub struct PipeConn {
    writer: Option<ChildStdin>,
    reader: Option<ChildStdout>,
    process: ChildProcess,
}

/// The process half of a [`PipeConn`], kept by whoever is responsible for
/// killing and reaping it.
pub struct ChildProcess {
    child: Child,
    program: String,
}

impl PipeConn {
    /// Start `program` with `args`, piping its stdin and stdout.
    pub fn open<S: AsRef<str>>(program: &str, args: &[S]) -> Result<Self, Error> {
        let spawn_error = |source: io::Error| Error::Spawn {
            program: program.to_string(),
            source,
        };

        let mut cmd = Command::new(program);
        for a in args {
            cmd.arg(a.as_ref());
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let mut process = ChildProcess {
            child,
            program: program.to_string(),
        };
        let writer = process.child.stdin.take();
        let reader = process.child.stdout.take();
        let (writer, reader) = match (writer, reader) {
            (Some(w), Some(r)) => (w, r),
            (w, r) => {
                drop(w);
                drop(r);
                // Already exiting if this fails; kill_on_drop covers the rest.
                let _ = process.child.start_kill();
                return Err(spawn_error(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "can't pipe child stdio",
                )));
            }
        };

        info!(program, pid = ?process.id(), "started peer process");
        Ok(PipeConn {
            writer: Some(writer),
            reader: Some(reader),
            process,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Hand out the three parts separately so each can have its own owner.
    pub fn into_split(mut self) -> Result<(ChildStdout, ChildStdin, ChildProcess), Error> {
        match (self.reader.take(), self.writer.take()) {
            (Some(r), Some(w)) => Ok((r, w, self.process)),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Close stdin, then stdout, then kill and reap the child. Every step
    /// runs even if an earlier one failed; the first failure is returned.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut first: Option<io::Error> = None;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                first.get_or_insert(e);
            }
        }
        drop(self.reader.take());
        if let Err(e) = self.process.terminate().await {
            first.get_or_insert(e);
        }
        match first {
            Some(e) => Err(Error::Io(e)),
            None => Ok(()),
        }
    }
}

impl ChildProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Kill, then wait for exit. The exit status is not an error: the peer
    /// was just killed, so a signal status is expected.
    pub async fn terminate(&mut self) -> io::Result<()> {
        let mut first: Option<io::Error> = None;
        if let Err(e) = self.child.start_kill() {
            // Already reaped; nothing left to kill or wait for.
            if e.kind() == io::ErrorKind::InvalidInput {
                return Ok(());
            }
            first.get_or_insert(e);
        }
        match self.child.wait().await {
            Ok(status) => debug!(program = %self.program, %status, "peer process exited"),
            Err(e) => {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pipe closed")
}

impl AsyncRead for PipeConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reader.as_mut() {
            Some(r) => Pin::new(r).poll_read(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }
}

impl AsyncWrite for PipeConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writer.as_mut() {
            Some(w) => Pin::new(w).poll_write(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.writer.as_mut() {
            Some(w) => Pin::new(w).poll_flush(cx),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.writer.as_mut() {
            Some(w) => Pin::new(w).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
