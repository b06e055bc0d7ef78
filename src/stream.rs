use crate::tokio::{ReadOutcome, ReadyReader, ReadyWriter, WriteOutcome};
use crate::Error;
use std::future::Future;
use std::io;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// A readiness-style front for a bidirectional tokio stream.
///
/// The stream is split with [`tokio::io::split`] and each half gets its own [`ReadyReader`] or
/// [`ReadyWriter`], so one read and one write can be outstanding at the same time. This is the
/// shape expected by libraries that drive a socket through [`io::Read`] and [`io::Write`] and
/// treat [`io::ErrorKind::WouldBlock`] as "try again once ready".
#[derive(Debug)]
pub struct ReadyStream<S> {
    reader: ReadyReader<ReadHalf<S>>,
    writer: ReadyWriter<WriteHalf<S>>,
}

impl<S> From<S> for ReadyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    fn from(stream: S) -> Self {
        Self::with_capacity(crate::DEFAULT_CAPACITY, stream)
    }
}

impl<S> ReadyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    /// Wraps `stream` with `capacity` bytes of buffering in each direction.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize, stream: S) -> Self {
        let (r, w) = tokio::io::split(stream);
        ReadyStream {
            reader: ReadyReader::with_capacity(capacity, r),
            writer: ReadyWriter::with_capacity(capacity, w),
        }
    }

    /// See [`ReadyReader::try_read`].
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error> {
        self.reader.try_read(buf)
    }

    /// See [`ReadyReader::ready`].
    pub fn ready(&self) -> impl Future<Output = Result<(), Error>> + '_ {
        self.reader.ready()
    }

    /// See [`ReadyReader::poll_ready`].
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        self.reader.poll_ready(cx)
    }

    /// See [`ReadyWriter::try_write`].
    pub fn try_write(&mut self, buf: &[u8]) -> Result<WriteOutcome, Error> {
        self.writer.try_write(buf)
    }

    /// See [`ReadyWriter::drain`].
    pub fn drain(&self) -> impl Future<Output = Result<(), Error>> + '_ {
        self.writer.drain()
    }

    /// See [`ReadyWriter::poll_drain`].
    pub fn poll_drain(&self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        self.writer.poll_drain(cx)
    }
}

impl<S> ReadyStream<S> {
    /// Gets a reference to the read side.
    pub fn reader(&self) -> &ReadyReader<ReadHalf<S>> {
        &self.reader
    }

    /// Gets a reference to the write side.
    pub fn writer(&self) -> &ReadyWriter<WriteHalf<S>> {
        &self.writer
    }

    /// Separates the two sides so they can be driven independently.
    ///
    /// Any buffered or outstanding state is preserved.
    pub fn split(self) -> (ReadyReader<ReadHalf<S>>, ReadyWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

impl<S> io::Read for ReadyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.reader, buf)
    }
}

impl<S> io::Write for ReadyStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.writer, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.writer)
    }
}
