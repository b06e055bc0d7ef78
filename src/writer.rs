use crate::Error;
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};
use std::cell::RefCell;
use std::fmt;
use std::future::{poll_fn, Future};
use std::io;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

macro_rules! make_writer {
    ($write_trait:path, $internal_poll_writer:path, $internal_poll_flush:path) => {
        pub use crate::writer::WriteOutcome;

        /// A readiness-style front for an asynchronous writer.
        ///
        /// To use, provide a writer that implements
        #[doc=concat!("[`", stringify!($write_trait), "`],")]
        /// hand it bytes with [`ReadyWriter::try_write`], and wait for them to reach the writer
        /// with [`ReadyWriter::drain`].
        ///
        /// Accepted bytes are copied into a bounded buffer and written out by a single background
        /// task spawned with [`tokio::task::spawn_local`], so the wrapper must be used from within
        /// a [`tokio::task::LocalSet`]. At most one write is outstanding against the underlying
        /// writer at any time.
        ///
        /// Once the underlying writer fails, every later call reports the same
        /// [`Error::StreamWrite`](crate::Error::StreamWrite).
        #[derive(Debug)]
        pub struct ReadyWriter<W>(crate::writer::ReadyWriter<W>);

        impl<W> From<W> for ReadyWriter<W>
        where
            W: $write_trait + Unpin + 'static,
        {
            fn from(writer: W) -> Self {
                Self::with_capacity(crate::DEFAULT_CAPACITY, writer)
            }
        }

        impl<W> ReadyWriter<W>
        where
            W: $write_trait + Unpin + 'static,
        {
            /// Wraps `writer` with a buffer holding at most `capacity` unsent bytes.
            ///
            /// # Panics
            ///
            /// Panics if `capacity` is zero.
            pub fn with_capacity(capacity: usize, writer: W) -> Self {
                Self(crate::writer::ReadyWriter::new(
                    capacity,
                    writer,
                    $internal_poll_writer,
                    $internal_poll_flush,
                ))
            }

            /// Accepts as many bytes from `buf` as fit in the buffer without waiting.
            ///
            /// Returns [`WriteOutcome::WouldBlock`] if the buffer is full; wait on
            /// [`ReadyWriter::drain`] before trying again. A count smaller than `buf.len()` is a
            /// partial accept, not an error.
            ///
            /// # Panics
            ///
            /// Panics when a write needs to be started outside of a [`tokio::task::LocalSet`].
            pub fn try_write(&mut self, buf: &[u8]) -> Result<WriteOutcome, crate::Error> {
                self.0.try_write(buf)
            }

            /// Waits until every byte accepted before this call has been written to, and
            /// flushed by, the underlying writer.
            pub fn drain(&self) -> impl ::std::future::Future<Output = Result<(), crate::Error>> + '_ {
                self.0.drain()
            }

            /// Polls for everything accepted so far to be written and flushed.
            pub fn poll_drain(
                &self,
                cx: &mut ::std::task::Context<'_>,
            ) -> ::std::task::Poll<Result<(), crate::Error>> {
                self.0.poll_drain(cx)
            }
        }

        impl<W> ReadyWriter<W> {
            /// The most bytes that can be buffered at once.
            pub fn capacity(&self) -> usize {
                self.0.capacity()
            }

            /// Bytes accepted but not yet confirmed written, including those being written now.
            pub fn buffered(&self) -> usize {
                self.0.buffered()
            }

            /// Returns `true` if nothing is buffered and no write is outstanding.
            pub fn is_idle(&self) -> bool {
                self.0.is_idle()
            }

            /// Unwraps this `ReadyWriter`, returning the underlying writer.
            ///
            /// Returns `None` if a write is still outstanding; the writer is then dropped once
            /// that write completes. Any bytes that were not yet written are lost.
            pub fn into_inner(self) -> Option<W> {
                self.0.into_inner()
            }
        }

        impl<W> ::std::io::Write for ReadyWriter<W>
        where
            W: $write_trait + Unpin + 'static,
        {
            fn write(&mut self, buf: &[u8]) -> ::std::io::Result<usize> {
                match self.try_write(buf)? {
                    WriteOutcome::Accepted(n) => Ok(n),
                    WriteOutcome::WouldBlock => Err(::std::io::ErrorKind::WouldBlock.into()),
                }
            }

            /// Succeeds only once everything accepted so far has been written out.
            fn flush(&mut self) -> ::std::io::Result<()> {
                self.0.check()?;
                if self.is_idle() {
                    Ok(())
                } else {
                    Err(::std::io::ErrorKind::WouldBlock.into())
                }
            }
        }
    };
}

pub(crate) type PollWrite<W> = fn(Pin<&mut W>, &mut Context<'_>, &[u8]) -> Poll<io::Result<usize>>;
pub(crate) type PollFlush<W> = fn(Pin<&mut W>, &mut Context<'_>) -> Poll<io::Result<()>>;

/// What happened to the bytes handed to `try_write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This many bytes were copied into the buffer.
    Accepted(usize),
    /// The buffer is full.
    WouldBlock,
}

struct State<W> {
    // `None` while a write task holds it.
    writer: Option<W>,
    // accepted, not yet handed to the write task
    pending: BytesMut,
    // handed to the write task, not yet confirmed written
    in_flight: usize,
    capacity: usize,
    accepted: u64,
    delivered: u64,
    error: Option<Error>,
    waiters: Vec<Waker>,
}

impl<W> State<W> {
    fn register(&mut self, waker: &Waker) {
        if !self.waiters.iter().any(|w| w.will_wake(waker)) {
            self.waiters.push(waker.clone());
        }
    }

    fn fail(&mut self, err: io::Error) -> Error {
        debug!("underlying write failed: {}", err);
        let err = Error::write(err);
        self.error = Some(err.clone());
        err
    }
}

fn wake_all(waiters: Vec<Waker>) {
    for waker in waiters {
        waker.wake();
    }
}

pub(crate) struct ReadyWriter<W> {
    state: Rc<RefCell<State<W>>>,
    poll_write: PollWrite<W>,
    poll_flush: PollFlush<W>,
}

impl<W> fmt::Debug for ReadyWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ReadyWriter")
            .field("capacity", &state.capacity)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight)
            .field("error", &state.error)
            .finish()
    }
}

impl<W> ReadyWriter<W> {
    pub(crate) fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    pub(crate) fn buffered(&self) -> usize {
        let state = self.state.borrow();
        state.pending.len() + state.in_flight
    }

    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        state.writer.is_some() && state.pending.is_empty()
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        match &self.state.borrow().error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn into_inner(self) -> Option<W> {
        let writer = self.state.borrow_mut().writer.take();
        writer
    }
}

impl<W: Unpin + 'static> ReadyWriter<W> {
    pub(crate) fn new(
        capacity: usize,
        writer: W,
        poll_write: PollWrite<W>,
        poll_flush: PollFlush<W>,
    ) -> Self {
        assert!(capacity > 0, "ReadyWriter capacity must be non-zero");
        ReadyWriter {
            state: Rc::new(RefCell::new(State {
                writer: Some(writer),
                pending: BytesMut::with_capacity(capacity),
                in_flight: 0,
                capacity,
                accepted: 0,
                delivered: 0,
                error: None,
                waiters: Vec::new(),
            })),
            poll_write,
            poll_flush,
        }
    }

    pub(crate) fn try_write(&mut self, buf: &[u8]) -> Result<WriteOutcome, Error> {
        let n = {
            let mut state = self.state.borrow_mut();
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if buf.is_empty() {
                return Ok(WriteOutcome::Accepted(0));
            }

            let free = state.capacity - state.pending.len() - state.in_flight;
            if free == 0 {
                return Ok(WriteOutcome::WouldBlock);
            }

            let n = free.min(buf.len());
            state.pending.extend_from_slice(&buf[..n]);
            state.accepted += n as u64;
            n
        };

        self.start_write();
        Ok(WriteOutcome::Accepted(n))
    }

    pub(crate) fn drain(&self) -> impl Future<Output = Result<(), Error>> + '_ {
        let target = self.state.borrow().accepted;
        poll_fn(move |cx| self.poll_drain_to(cx, target))
    }

    pub(crate) fn poll_drain(&self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        let target = self.state.borrow().accepted;
        self.poll_drain_to(cx, target)
    }

    fn poll_drain_to(&self, cx: &mut Context<'_>, target: u64) -> Poll<Result<(), Error>> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        if let Some(err) = &state.error {
            return Poll::Ready(Err(err.clone()));
        }
        if state.delivered < target {
            state.register(cx.waker());
            return Poll::Pending;
        }

        // everything up to `target` is written; the writer may still hold it in its own buffers
        let Some(writer) = state.writer.as_mut() else {
            // a later write is outstanding, flush once it hands the writer back
            state.register(cx.waker());
            return Poll::Pending;
        };
        match (self.poll_flush)(Pin::new(writer), cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) => {
                let err = state.fail(err);
                wake_all(std::mem::take(&mut state.waiters));
                Poll::Ready(Err(err))
            }
            Poll::Pending => {
                state.register(cx.waker());
                Poll::Pending
            }
        }
    }

    /// Hands everything pending to a new write task, unless one is already running.
    fn start_write(&self) {
        let (writer, region) = {
            let mut state = self.state.borrow_mut();
            if state.error.is_some() || state.pending.is_empty() {
                return;
            }
            let Some(writer) = state.writer.take() else {
                return;
            };
            let region = state.pending.split().freeze();
            state.in_flight = region.len();
            (writer, region)
        };

        trace!("starting background write of {} bytes", region.len());
        tokio::task::spawn_local(write_task(
            Rc::downgrade(&self.state),
            writer,
            region,
            self.poll_write,
        ));
    }
}

/// Writes `region` out, then keeps picking up whatever was accepted in the meantime until the
/// buffer is empty, the writer fails, or the owning `ReadyWriter` goes away.
async fn write_task<W: Unpin>(
    weak: Weak<RefCell<State<W>>>,
    mut writer: W,
    mut region: Bytes,
    poll_write: PollWrite<W>,
) {
    loop {
        let result = poll_fn(|cx| poll_write(Pin::new(&mut writer), cx, &region[..])).await;

        let Some(shared) = weak.upgrade() else {
            let written = result.as_ref().map_or(0, |&n| n.min(region.len()));
            debug!(
                "ReadyWriter dropped during write, discarding {} unwritten bytes",
                region.len() - written
            );
            return;
        };
        let mut state = shared.borrow_mut();

        match result {
            Ok(0) => {
                state.fail(io::ErrorKind::WriteZero.into());
            }
            Ok(n) => {
                let n = n.min(region.len());
                trace!("background write completed with {} bytes", n);
                region.advance(n);
                state.in_flight -= n;
                state.delivered += n as u64;

                if region.is_empty() && !state.pending.is_empty() {
                    region = state.pending.split().freeze();
                    state.in_flight = region.len();
                }
                if !region.is_empty() {
                    let waiters = std::mem::take(&mut state.waiters);
                    drop(state);
                    wake_all(waiters);
                    continue;
                }
            }
            Err(err) => {
                state.fail(err);
            }
        }

        // done, either drained or failed
        state.in_flight = 0;
        state.writer = Some(writer);
        let waiters = std::mem::take(&mut state.waiters);
        drop(state);
        wake_all(waiters);
        return;
    }
}

#[cfg(test)]
mod tests {
    use crate::tokio::{ReadyWriter, WriteOutcome};
    use crate::Error;
    use futures::FutureExt;
    use std::io::{self, Write};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, AsyncWrite};
    use tokio::task::LocalSet;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// Accepts at most `chunk` bytes per write and fails once `fail_after` bytes have gone out.
    /// Every flush fails while `fail_flush` is set.
    struct Scripted {
        out: Vec<u8>,
        chunk: usize,
        fail_after: Option<usize>,
        flushes: usize,
        fail_flush: bool,
    }

    impl AsyncWrite for Scripted {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if let Some(limit) = self.fail_after {
                if self.out.len() >= limit {
                    return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
                }
            }
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            if self.fail_flush {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "flush failed")));
            }
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn scripted(chunk: usize, fail_after: Option<usize>) -> Scripted {
        Scripted {
            out: Vec::new(),
            chunk,
            fail_after,
            flushes: 0,
            fail_flush: false,
        }
    }

    /// Parks every write once before completing it, tracking how many are outstanding.
    #[derive(Default)]
    struct Parking {
        out: Vec<u8>,
        parked: bool,
        outstanding: usize,
        most_outstanding: usize,
    }

    impl AsyncWrite for Parking {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if !self.parked {
                self.parked = true;
                self.outstanding += 1;
                self.most_outstanding = self.most_outstanding.max(self.outstanding);
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            self.parked = false;
            self.outstanding -= 1;
            let n = buf.len().min(16);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn partial_writes_are_reissued() {
        LocalSet::new()
            .run_until(async {
                let mut w = ReadyWriter::with_capacity(32, scripted(3, None));
                assert_eq!(
                    w.try_write(b"hello world").unwrap(),
                    WriteOutcome::Accepted(11)
                );
                w.drain().await.unwrap();
                assert!(w.is_idle());
                let inner = w.into_inner().unwrap();
                assert_eq!(inner.out, b"hello world");
                assert_eq!(inner.flushes, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn accept_is_bounded_by_capacity() {
        LocalSet::new()
            .run_until(async {
                let mut w = ReadyWriter::with_capacity(4, scripted(1, None));
                assert_eq!(w.capacity(), 4);
                assert_eq!(w.try_write(b"abcdef").unwrap(), WriteOutcome::Accepted(4));
                assert_eq!(w.buffered(), 4);
                assert_eq!(w.try_write(b"ef").unwrap(), WriteOutcome::WouldBlock);
                assert_eq!(w.try_write(b"").unwrap(), WriteOutcome::Accepted(0));

                w.drain().await.unwrap();
                assert_eq!(w.buffered(), 0);
                assert_eq!(w.try_write(b"ef").unwrap(), WriteOutcome::Accepted(2));
                w.drain().await.unwrap();
                assert_eq!(w.into_inner().unwrap().out, b"abcdef");
            })
            .await;
    }

    #[tokio::test]
    async fn space_is_reclaimed_as_writes_complete() {
        LocalSet::new()
            .run_until(async {
                let (a, mut b) = tokio::io::duplex(5);
                let mut w = ReadyWriter::with_capacity(16, a);
                assert_eq!(
                    w.try_write(&[7u8; 16]).unwrap(),
                    WriteOutcome::Accepted(16)
                );
                assert_eq!(w.try_write(b"x").unwrap(), WriteOutcome::WouldBlock);

                // the pipe only takes five bytes until someone reads
                settle().await;
                assert_eq!(w.buffered(), 11);
                assert_eq!(w.try_write(&[8u8; 9]).unwrap(), WriteOutcome::Accepted(5));
                assert_eq!(w.try_write(b"x").unwrap(), WriteOutcome::WouldBlock);

                let mut got = vec![0u8; 21];
                let (drained, read) = tokio::join!(w.drain(), b.read_exact(&mut got));
                drained.unwrap();
                read.unwrap();
                assert_eq!(&got[..16], &[7u8; 16][..]);
                assert_eq!(&got[16..], &[8u8; 5][..]);
            })
            .await;
    }

    #[tokio::test]
    async fn failure_is_sticky() {
        LocalSet::new()
            .run_until(async {
                let mut w = ReadyWriter::with_capacity(16, scripted(4, Some(4)));
                assert_eq!(
                    w.try_write(b"abcdefgh").unwrap(),
                    WriteOutcome::Accepted(8)
                );
                let err = w.drain().await.unwrap_err();
                assert!(matches!(err, Error::StreamWrite(_)));
                assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

                assert!(matches!(w.try_write(b"x"), Err(Error::StreamWrite(_))));
                assert!(matches!(w.drain().await, Err(Error::StreamWrite(_))));
                assert_eq!(
                    w.write(b"x").unwrap_err().kind(),
                    io::ErrorKind::ConnectionReset
                );
            })
            .await;
    }

    #[tokio::test]
    async fn closed_pipe_fails_drain() {
        LocalSet::new()
            .run_until(async {
                let (a, b) = tokio::io::duplex(64);
                drop(b);
                let mut w = ReadyWriter::from(a);
                // the failure is only found in the background
                assert_eq!(w.try_write(b"foo").unwrap(), WriteOutcome::Accepted(3));
                let err = w.drain().await.unwrap_err();
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
            })
            .await;
    }

    #[tokio::test]
    async fn drop_with_write_outstanding() {
        LocalSet::new()
            .run_until(async {
                let (a, mut b) = tokio::io::duplex(4);
                let mut w = ReadyWriter::from(a);
                assert_eq!(
                    w.try_write(b"abcdefgh").unwrap(),
                    WriteOutcome::Accepted(8)
                );
                settle().await;
                assert!(!w.is_idle());
                drop(w);

                // the outstanding write still completes, then the writer is released
                let mut got = Vec::new();
                b.read_to_end(&mut got).await.unwrap();
                assert_eq!(got, b"abcdefgh");
            })
            .await;
    }

    #[tokio::test]
    async fn io_write_reports_would_block() {
        LocalSet::new()
            .run_until(async {
                let (a, mut b) = tokio::io::duplex(64);
                let mut w = ReadyWriter::with_capacity(2, a);
                assert_eq!(w.write(b"abc").unwrap(), 2);
                assert_eq!(
                    w.write(b"c").unwrap_err().kind(),
                    io::ErrorKind::WouldBlock
                );
                assert_eq!(w.flush().unwrap_err().kind(), io::ErrorKind::WouldBlock);

                w.drain().await.unwrap();
                w.flush().unwrap();
                let mut got = [0u8; 2];
                b.read_exact(&mut got).await.unwrap();
                assert_eq!(&got, b"ab");
            })
            .await;
    }

    #[tokio::test]
    async fn zero_length_write_fails() {
        LocalSet::new()
            .run_until(async {
                let mut w = ReadyWriter::with_capacity(16, scripted(0, None));
                assert_eq!(w.try_write(b"abc").unwrap(), WriteOutcome::Accepted(3));
                let err = w.drain().await.unwrap_err();
                assert!(matches!(err, Error::StreamWrite(_)));
                assert_eq!(err.kind(), io::ErrorKind::WriteZero);

                for _ in 0..2 {
                    let err = w.try_write(b"d").unwrap_err();
                    assert_eq!(err.kind(), io::ErrorKind::WriteZero);
                    let err = w.drain().await.unwrap_err();
                    assert_eq!(err.kind(), io::ErrorKind::WriteZero);
                }
            })
            .await;
    }

    #[tokio::test]
    async fn flush_failure_fails_drain() {
        LocalSet::new()
            .run_until(async {
                let mut inner = scripted(8, None);
                inner.fail_flush = true;
                let mut w = ReadyWriter::with_capacity(16, inner);
                assert_eq!(w.try_write(b"abc").unwrap(), WriteOutcome::Accepted(3));
                let err = w.drain().await.unwrap_err();
                assert!(matches!(err, Error::StreamWrite(_)));
                assert_eq!(err.kind(), io::ErrorKind::Other);
                assert!(matches!(w.try_write(b"d"), Err(Error::StreamWrite(_))));
            })
            .await;
    }

    #[tokio::test]
    async fn one_write_outstanding_at_a_time() {
        LocalSet::new()
            .run_until(async {
                let data: Vec<u8> = (0..200u8).collect();
                let mut w = ReadyWriter::with_capacity(64, Parking::default());
                let mut sent = 0;
                while sent < data.len() {
                    match w.try_write(&data[sent..]).unwrap() {
                        WriteOutcome::Accepted(n) => sent += n,
                        WriteOutcome::WouldBlock => tokio::task::yield_now().await,
                    }
                }
                w.drain().await.unwrap();

                let inner = w.into_inner().unwrap();
                assert_eq!(inner.most_outstanding, 1);
                assert_eq!(inner.outstanding, 0);
                assert_eq!(inner.out, data);
            })
            .await;
    }

    #[test]
    fn drain_on_fresh_writer_is_immediate() {
        let (a, _b) = tokio::io::duplex(64);
        let w = ReadyWriter::from(a);
        assert!(matches!(w.drain().now_or_never(), Some(Ok(()))));
        assert!(w.is_idle());
    }
}
