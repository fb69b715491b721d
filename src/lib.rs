//! One-way file transfer over UDP for data-diode deployments.
//!
//! A sender chunks a file into numbered frames and emits them at a paced
//! rate; a receiver accepts frames from many concurrent senders, reorders
//! them per session, optionally rewraps CloakedDagger-masked payloads into
//! one continuous masked stream, and writes each completed file to disk
//! under the name carried by the terminator frame. The link is physically
//! one-way: there are no acknowledgements and no retransmissions.

pub mod client;
pub mod cloaked_dagger;
pub mod frame;
pub mod queue;
pub mod rewrap;
pub mod server;
pub mod session;
pub mod sisl;
pub mod stream;
pub mod writer;


// Re-export the wire-level types for direct access
pub use frame::{Frame, FrameError, FrameHeader};

// Re-export the main server and client APIs for easy access
pub use client::{DiodeClient, DiodeClientError};
pub use server::Server;
pub use session::SessionManager;
pub use stream::{DropStream, FileStream, SinkFactory, StreamSink};
pub use writer::{DiodeType, OrderingStreamWriter, SessionState};

/// Error returned by most functions.
///
/// Boundary errors that are hit during normal operation (a truncated
/// datagram, a bad wrap header) have their own `enum` types so callers can
/// drop-and-continue cheaply; this boxed type is for application-level
/// plumbing where the only sensible response is to log and bail out.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for diode operations.
pub type Result<T> = std::result::Result<T, Error>;
