use crate::Error;
use bytes::{Buf, BytesMut};
use log::{debug, trace};
use std::cell::RefCell;
use std::fmt;
use std::future::{poll_fn, Future};
use std::io;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

macro_rules! make_reader {
    ($read_trait:path, $internal_poll_reader:path) => {
        pub use crate::reader::ReadOutcome;

        /// A readiness-style front for an asynchronous reader.
        ///
        /// To use, provide a reader that implements
        #[doc=concat!("[`", stringify!($read_trait), "`],")]
        /// take bytes out with [`ReadyReader::try_read`], and wait for more with
        /// [`ReadyReader::ready`].
        ///
        /// Bytes are fetched ahead of time into a bounded buffer by a background task spawned
        /// with [`tokio::task::spawn_local`], so the wrapper must be used from within a
        /// [`tokio::task::LocalSet`]. At most one read is outstanding against the underlying
        /// reader at any time.
        #[derive(Debug)]
        pub struct ReadyReader<R>(crate::reader::ReadyReader<R>);

        impl<R> From<R> for ReadyReader<R>
        where
            R: $read_trait + Unpin + 'static,
        {
            fn from(reader: R) -> Self {
                Self::with_capacity(crate::DEFAULT_CAPACITY, reader)
            }
        }

        impl<R> ReadyReader<R>
        where
            R: $read_trait + Unpin + 'static,
        {
            /// Wraps `reader`, fetching at most `capacity` bytes ahead.
            ///
            /// # Panics
            ///
            /// Panics if `capacity` is zero.
            pub fn with_capacity(capacity: usize, reader: R) -> Self {
                Self(crate::reader::ReadyReader::new(
                    capacity,
                    reader,
                    $internal_poll_reader,
                ))
            }

            /// Copies already-fetched bytes into `buf` without waiting.
            ///
            /// Returns [`ReadOutcome::WouldBlock`] if nothing has arrived yet, in which case a
            /// fetch is started and [`ReadyReader::ready`] resolves once it completes.
            /// [`ReadOutcome::Eof`] is returned for every call once the reader is exhausted.
            ///
            /// # Panics
            ///
            /// Panics when a fetch needs to be started outside of a [`tokio::task::LocalSet`].
            pub fn try_read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, crate::Error> {
                self.0.try_read(buf)
            }

            /// Waits until [`ReadyReader::try_read`] is likely to make progress.
            pub fn ready(&self) -> impl ::std::future::Future<Output = Result<(), crate::Error>> + '_ {
                self.0.ready()
            }

            /// Polls for buffered bytes or end-of-stream, starting a fetch if needed.
            pub fn poll_ready(
                &self,
                cx: &mut ::std::task::Context<'_>,
            ) -> ::std::task::Poll<Result<(), crate::Error>> {
                self.0.poll_ready(cx)
            }
        }

        impl<R> ReadyReader<R> {
            /// The most bytes fetched ahead at once.
            pub fn capacity(&self) -> usize {
                self.0.capacity()
            }

            /// Number of fetched bytes not yet handed out.
            pub fn buffered(&self) -> usize {
                self.0.buffered()
            }

            /// Returns `true` once the reader is exhausted and every fetched byte was handed out.
            pub fn is_eof(&self) -> bool {
                self.0.is_eof()
            }

            /// Unwraps this `ReadyReader`, returning the underlying reader.
            ///
            /// Returns `None` if a fetch is still outstanding; the reader is then dropped once
            /// that fetch completes. Note that any leftover data in the internal buffer is lost.
            pub fn into_inner(self) -> Option<R> {
                self.0.into_inner()
            }
        }

        impl<R> ::std::io::Read for ReadyReader<R>
        where
            R: $read_trait + Unpin + 'static,
        {
            fn read(&mut self, buf: &mut [u8]) -> ::std::io::Result<usize> {
                match self.try_read(buf)? {
                    ReadOutcome::Read(n) => Ok(n),
                    ReadOutcome::Eof => Ok(0),
                    ReadOutcome::WouldBlock => Err(::std::io::ErrorKind::WouldBlock.into()),
                }
            }
        }
    };
}

pub(crate) type PollRead<R> = fn(Pin<&mut R>, &mut Context<'_>, &mut [u8]) -> Poll<io::Result<usize>>;

/// What `try_read` produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were copied out. Only zero if the destination was empty.
    Read(usize),
    /// The underlying reader is exhausted and nothing is left in the buffer.
    Eof,
    /// Nothing has been fetched yet.
    WouldBlock,
}

struct State<R> {
    // `None` while a fill task holds it.
    reader: Option<R>,
    buffer: BytesMut,
    capacity: usize,
    eof: bool,
    error: Option<Error>,
    waiters: Vec<Waker>,
}

pub(crate) struct ReadyReader<R> {
    state: Rc<RefCell<State<R>>>,
    poll_read: PollRead<R>,
}

impl<R> fmt::Debug for ReadyReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ReadyReader")
            .field("capacity", &state.capacity)
            .field("buffered", &state.buffer.len())
            .field("filling", &state.reader.is_none())
            .field("eof", &state.eof)
            .field("error", &state.error)
            .finish()
    }
}

impl<R> ReadyReader<R> {
    pub(crate) fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    pub(crate) fn buffered(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    pub(crate) fn is_eof(&self) -> bool {
        let state = self.state.borrow();
        state.eof && state.buffer.is_empty()
    }

    pub(crate) fn into_inner(self) -> Option<R> {
        let reader = self.state.borrow_mut().reader.take();
        reader
    }
}

impl<R: Unpin + 'static> ReadyReader<R> {
    pub(crate) fn new(capacity: usize, reader: R, poll_read: PollRead<R>) -> Self {
        assert!(capacity > 0, "ReadyReader capacity must be non-zero");
        ReadyReader {
            state: Rc::new(RefCell::new(State {
                reader: Some(reader),
                buffer: BytesMut::with_capacity(capacity),
                capacity,
                eof: false,
                error: None,
                waiters: Vec::new(),
            })),
            poll_read,
        }
    }

    pub(crate) fn try_read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if buf.is_empty() {
                return Ok(ReadOutcome::Read(0));
            }
            if !state.buffer.is_empty() {
                let n = buf.len().min(state.buffer.len());
                buf[..n].copy_from_slice(&state.buffer[..n]);
                state.buffer.advance(n);
                return Ok(ReadOutcome::Read(n));
            }
            if state.eof {
                return Ok(ReadOutcome::Eof);
            }
        }

        self.start_fill();
        Ok(ReadOutcome::WouldBlock)
    }

    pub(crate) fn ready(&self) -> impl Future<Output = Result<(), Error>> + '_ {
        poll_fn(move |cx| self.poll_ready(cx))
    }

    pub(crate) fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(err) = &state.error {
                return Poll::Ready(Err(err.clone()));
            }
            if !state.buffer.is_empty() || state.eof {
                return Poll::Ready(Ok(()));
            }
            if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
                state.waiters.push(cx.waker().clone());
            }
        }

        self.start_fill();
        Poll::Pending
    }

    /// Lends the empty buffer to a new fill task, unless one is already running.
    fn start_fill(&self) {
        let (reader, region) = {
            let mut state = self.state.borrow_mut();
            if state.error.is_some() || state.eof || !state.buffer.is_empty() {
                return;
            }
            let Some(reader) = state.reader.take() else {
                return;
            };
            let capacity = state.capacity;
            let mut region = std::mem::take(&mut state.buffer);
            region.clear();
            region.resize(capacity, 0);
            (reader, region)
        };

        trace!("starting background read of up to {} bytes", region.len());
        tokio::task::spawn_local(fill_task(
            Rc::downgrade(&self.state),
            reader,
            region,
            self.poll_read,
        ));
    }
}

async fn fill_task<R: Unpin>(
    weak: Weak<RefCell<State<R>>>,
    mut reader: R,
    mut region: BytesMut,
    poll_read: PollRead<R>,
) {
    let result = poll_fn(|cx| poll_read(Pin::new(&mut reader), cx, &mut region[..])).await;

    let Some(shared) = weak.upgrade() else {
        debug!("ReadyReader dropped during read, releasing the reader");
        return;
    };
    let mut state = shared.borrow_mut();
    state.reader = Some(reader);

    match result {
        Ok(0) => {
            trace!("background read reached end of stream");
            state.eof = true;
        }
        Ok(n) => {
            trace!("background read completed with {} bytes", n);
            region.truncate(n);
            state.buffer = region;
        }
        Err(err) => {
            debug!("underlying read failed: {}", err);
            state.error = Some(Error::read(err));
        }
    }

    let waiters = std::mem::take(&mut state.waiters);
    drop(state);
    for waker in waiters {
        waker.wake();
    }
}
