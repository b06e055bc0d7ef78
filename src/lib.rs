//! Readiness-style access to asynchronous byte streams.
//!
//! Some libraries are written against non-blocking sockets: they try an operation, get back
//! either a result or "would block", and separately wait for the socket to become ready. This
//! crate lets such code run on top of a stream that is only available through an asynchronous
//! interface such as tokio's `AsyncWrite` and `AsyncRead`, or their `futures-io` counterparts
//! (behind the `futures` feature).
//!
//! On the write side, [`ReadyWriter`](crate::tokio::ReadyWriter) copies bytes into a bounded
//! buffer without waiting and writes them out in the background; `drain` waits for them to
//! land. On the read side, [`ReadyReader`](crate::tokio::ReadyReader) fetches bytes ahead into a
//! bounded buffer and hands them out without waiting once they have arrived; `ready` waits for
//! the next batch.
//!
//! Background I/O runs on tasks spawned with `tokio::task::spawn_local`, one per direction and
//! never more than one at a time, so the wrappers must be used from inside a tokio `LocalSet`.
//! Dropping a wrapper while an operation is outstanding is fine: the operation owns the region
//! of the buffer it works on and releases it, together with the stream, once it completes.
//!
//! ```no_run
//! use readiness_io::tokio::{ReadOutcome, ReadyReader, ReadyWriter, WriteOutcome};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> Result<(), readiness_io::Error> {
//! let (r, w) = stream.into_split();
//! let mut w = ReadyWriter::from(w);
//! let mut r = ReadyReader::from(r);
//!
//! let mut msg: &[u8] = b"hello";
//! while !msg.is_empty() {
//!     match w.try_write(msg)? {
//!         WriteOutcome::Accepted(n) => msg = &msg[n..],
//!         WriteOutcome::WouldBlock => w.drain().await?,
//!     }
//! }
//! w.drain().await?;
//!
//! let mut buf = [0u8; 1024];
//! loop {
//!     match r.try_read(&mut buf)? {
//!         ReadOutcome::Read(n) => println!("got {:?}", &buf[..n]),
//!         ReadOutcome::Eof => break,
//!         ReadOutcome::WouldBlock => r.ready().await?,
//!     }
//! }
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]
#![deny(unused_extern_crates)]

#[macro_use]
mod reader;
#[macro_use]
mod writer;
mod error;
mod stream;

#[cfg(feature = "futures")]
pub mod futures;
pub mod tokio;

pub use error::Error;
pub use reader::ReadOutcome;
pub use writer::WriteOutcome;

/// Buffer size used by the `From` constructors.
pub const DEFAULT_CAPACITY: usize = 8192;
