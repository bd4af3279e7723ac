//! Byte streams flowing between pipeline stages.
//!
//! Every variant of [`ByteStream`] owns a real file descriptor, so a stream
//! can always be handed to a subprocess as its stdin.  In-process producers
//! (like the tar action) write into one end of an anonymous pipe from a
//! worker thread while the pipeline reads the other end.

use std::fs::File;
use std::io::{self, Read};
use std::process::{ChildStdout, Stdio};
use std::thread;

use crate::error::Result;

/// A readable, fd-backed stream produced by a pipeline stage.
pub enum ByteStream {
    /// A regular file opened for reading.
    File(File),
    /// The read end of an anonymous pipe.
    Pipe(os_pipe::PipeReader),
    /// The standard output of a spawned process.
    Child(ChildStdout),
}

impl ByteStream {
    /// Convert into a `Stdio` so the stream can feed a subprocess stdin.
    pub fn into_stdio(self) -> Stdio {
        match self {
            ByteStream::File(f) => Stdio::from(f),
            ByteStream::Pipe(r) => Stdio::from(r),
            ByteStream::Child(c) => Stdio::from(c),
        }
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ByteStream::File(_) => "file",
            ByteStream::Pipe(_) => "pipe",
            ByteStream::Child(_) => "process",
        }
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ByteStream::File(f) => f.read(buf),
            ByteStream::Pipe(r) => r.read(buf),
            ByteStream::Child(c) => c.read(buf),
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ByteStream").field(&self.kind()).finish()
    }
}

/// Run `producer` on a named worker thread writing into a fresh pipe and
/// return the read end as a [`ByteStream`].
///
/// The producer owns the write end and must close it (by dropping) when
/// done; readers observe EOF at that point.  Producer failures are logged,
/// the reader then sees a short stream.
pub fn spawn_pipe_writer<F>(name: &str, producer: F) -> Result<ByteStream>
where
    F: FnOnce(os_pipe::PipeWriter) -> Result<()> + Send + 'static,
{
    let (reader, writer) = os_pipe::pipe()?;
    let thread_name = format!("backhaul-{name}");
    let label = thread_name.clone();
    thread::Builder::new().name(thread_name).spawn(move || {
        if let Err(e) = producer(writer) {
            tracing::error!("pipe producer {label} failed: {e}");
        }
    })?;
    Ok(ByteStream::Pipe(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pipe_writer_delivers_bytes_and_eof() {
        let mut stream = spawn_pipe_writer("test", |mut w| {
            w.write_all(b"hello backup")?;
            Ok(())
        })
        .unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello backup");
    }

    #[test]
    fn producer_error_truncates_stream() {
        let mut stream = spawn_pipe_writer("test-err", |mut w| {
            w.write_all(b"partial")?;
            Err(crate::error::Error::incompatible("boom"))
        })
        .unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"partial");
    }
}
