//! Readiness-style access to [`futures_io::AsyncRead`] and [`futures_io::AsyncWrite`] streams.
//! See the top-level documentation and the documentation for [`ReadyReader`] and
//! [`ReadyWriter`].

make_reader!(futures_io::AsyncRead, internal_poll_reader);
make_writer!(futures_io::AsyncWrite, internal_poll_writer, internal_poll_flush);

fn internal_poll_reader<R>(
    r: std::pin::Pin<&mut R>,
    cx: &mut std::task::Context,
    rest: &mut [u8],
) -> std::task::Poll<std::io::Result<usize>>
where
    R: futures_io::AsyncRead + Unpin,
{
    r.poll_read(cx, rest)
}

fn internal_poll_writer<W>(
    w: std::pin::Pin<&mut W>,
    cx: &mut std::task::Context,
    buf: &[u8],
) -> std::task::Poll<std::io::Result<usize>>
where
    W: futures_io::AsyncWrite + Unpin,
{
    w.poll_write(cx, buf)
}

fn internal_poll_flush<W>(
    w: std::pin::Pin<&mut W>,
    cx: &mut std::task::Context,
) -> std::task::Poll<std::io::Result<()>>
where
    W: futures_io::AsyncWrite + Unpin,
{
    w.poll_flush(cx)
}
