use std::io;
use std::sync::Arc;

/// A failure of the stream underneath a [`ReadyWriter`](crate::tokio::ReadyWriter) or
/// [`ReadyReader`](crate::tokio::ReadyReader).
///
/// Both variants are terminal: once an adapter has recorded one, it performs no further I/O and
/// hands out a clone of the same error on every subsequent call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Writing to (or flushing) the underlying stream failed.
    #[error("write to underlying stream failed: {0}")]
    StreamWrite(#[source] Arc<io::Error>),
    /// Reading from the underlying stream failed.
    #[error("read from underlying stream failed: {0}")]
    StreamRead(#[source] Arc<io::Error>),
}

impl Error {
    pub(crate) fn write(err: io::Error) -> Self {
        Error::StreamWrite(Arc::new(err))
    }

    pub(crate) fn read(err: io::Error) -> Self {
        Error::StreamRead(Arc::new(err))
    }

    /// The [`io::ErrorKind`] reported by the underlying stream.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Error::StreamWrite(e) | Error::StreamRead(e) => e.kind(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.kind(), err)
    }
}
