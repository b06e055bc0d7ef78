//! Readiness-style access to [`tokio::io::AsyncRead`] and [`tokio::io::AsyncWrite`] streams. See
//! the top-level documentation and the documentation for [`ReadyReader`], [`ReadyWriter`], and
//! [`ReadyStream`].

make_reader!(tokio::io::AsyncRead, internal_poll_reader);
make_writer!(tokio::io::AsyncWrite, internal_poll_writer, internal_poll_flush);

pub use crate::stream::ReadyStream;

fn internal_poll_reader<R>(
    r: std::pin::Pin<&mut R>,
    cx: &mut std::task::Context,
    rest: &mut [u8],
) -> std::task::Poll<std::io::Result<usize>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = tokio::io::ReadBuf::new(rest);
    futures_core::ready!(r.poll_read(cx, &mut buf))?;
    let n = buf.filled().len();
    std::task::Poll::Ready(Ok(n))
}

fn internal_poll_writer<W>(
    w: std::pin::Pin<&mut W>,
    cx: &mut std::task::Context,
    buf: &[u8],
) -> std::task::Poll<std::io::Result<usize>>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    w.poll_write(cx, buf)
}

fn internal_poll_flush<W>(
    w: std::pin::Pin<&mut W>,
    cx: &mut std::task::Context,
) -> std::task::Poll<std::io::Result<()>>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    w.poll_flush(cx)
}
