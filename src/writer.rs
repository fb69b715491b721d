//! Per-session ordered writer.
//!
//! Frames land in a priority queue on the receive path; a dedicated drain
//! thread, spawned lazily on first write, removes them in strict sequence
//! and emits them to the session's sink. Import sessions route payloads
//! through the streaming rewrapper on the way out. The drain thread exits
//! when the terminator frame has been emitted and the sink renamed, or when
//! the session is cancelled.

use crate::frame::Frame;
use crate::queue::{OrderedPacketQueue, SequencedPacket};
use crate::rewrap::StreamingRewrapper;
use crate::sisl::{REJECTED_NAME, SislFilename};
use crate::stream::StreamSink;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Whether payloads carry a CloakedDagger envelope that must be rewrapped
/// before they reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiodeType {
    Basic,
    Import,
}

/// Lifecycle of a session. Transitions are one-way: `Finalizing` is entered
/// when the terminator is emitted, `Closed` once the sink acknowledges the
/// rename, and `Aborted` replaces `Finalizing` on timeout or sink failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Active = 1,
    Finalizing = 2,
    Closed = 3,
    Aborted = 4,
}

impl SessionState {
    fn from_u8(raw: u8) -> SessionState {
        match raw {
            1 => SessionState::Active,
            2 => SessionState::Finalizing,
            3 => SessionState::Closed,
            4 => SessionState::Aborted,
            _ => SessionState::Idle,
        }
    }
}

/// Monotone wall-clock in seconds, injected so tests can drive timeouts.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// State shared between the receive path and the drain thread.
struct WriterShared {
    session_id: u32,
    queue: OrderedPacketQueue,
    sink: Mutex<Box<dyn StreamSink>>,
    filename_decoder: SislFilename,
    diode_type: DiodeType,
    state: AtomicU8,
    cancelled: AtomicBool,
    finished: AtomicBool,
}

impl WriterShared {
    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// One session's writer: queue, drain thread and sink.
pub struct OrderingStreamWriter {
    shared: Arc<WriterShared>,
    drain: Mutex<Option<JoinHandle<()>>>,
    clock: Clock,
    time_last_updated: AtomicU64,
    last_frame_received: AtomicU32,
    max_queue_length: usize,
    queue_exceeded: AtomicBool,
}

impl OrderingStreamWriter {
    pub fn new(
        session_id: u32,
        max_queue_length: usize,
        sink: Box<dyn StreamSink>,
        clock: Clock,
        diode_type: DiodeType,
        max_filename_length: usize,
    ) -> Self {
        let now = clock();
        OrderingStreamWriter {
            shared: Arc::new(WriterShared {
                session_id,
                queue: OrderedPacketQueue::new(),
                sink: Mutex::new(sink),
                filename_decoder: SislFilename::new(max_filename_length),
                diode_type,
                state: AtomicU8::new(SessionState::Idle as u8),
                cancelled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
            drain: Mutex::new(None),
            clock,
            time_last_updated: AtomicU64::new(now),
            last_frame_received: AtomicU32::new(0),
            max_queue_length,
            queue_exceeded: AtomicBool::new(false),
        }
    }

    /// Hand a parsed frame to the session. Non-blocking beyond the queue's
    /// critical section; completion is observed later via [`is_finished`].
    ///
    /// [`is_finished`]: OrderingStreamWriter::is_finished
    pub fn write(&self, frame: Frame) {
        self.time_last_updated
            .store((self.clock)(), Ordering::Relaxed);
        self.log_out_of_order(frame.header.frame_count);
        self.enqueue(frame);
        self.ensure_drain();
    }

    /// True once the drain thread has retired the session: terminator
    /// emitted and sink renamed, sink failure, or cancellation.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Wall-clock second of the last accepted write.
    pub fn time_last_updated(&self) -> u64 {
        self.time_last_updated.load(Ordering::Relaxed)
    }

    /// Highest sequence number seen on arrival; diagnostic only.
    pub fn last_frame_received(&self) -> u32 {
        self.last_frame_received.load(Ordering::Relaxed)
    }

    /// Cancel the drain thread and discard the staging output. Used by the
    /// session manager when the session's inactivity timeout expires.
    pub fn abort(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
        self.shared.set_state(SessionState::Aborted);
        let mut sink = self.shared.sink.lock().expect("sink lock poisoned");
        if let Err(error) = sink.delete() {
            warn!(session = self.shared.session_id, %error, "failed to discard staging output");
        }
    }

    /// Signal the drain thread to exit after its current iteration.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }

    /// Wait for the drain thread to exit. Called on shutdown and after
    /// completion so sinks are released in a known order.
    pub fn finalize(&self) {
        let handle = self.drain.lock().expect("drain handle lock poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(
                    session = self.shared.session_id,
                    "drain thread panicked before exit"
                );
            }
        }
    }

    fn log_out_of_order(&self, frame_count: u32) {
        let previous = self.last_frame_received.swap(frame_count, Ordering::Relaxed);
        if frame_count != previous.wrapping_add(1) {
            debug!(
                session = self.shared.session_id,
                frame = frame_count,
                previous,
                "out of order frame"
            );
        }
    }

    /// Bounded admission: on a one-way link the receiver must neither
    /// back-pressure nor grow without bound, so excess frames are shed.
    fn enqueue(&self, frame: Frame) {
        if self.shared.queue.len() >= self.max_queue_length {
            if !self.queue_exceeded.swap(true, Ordering::Relaxed) {
                error!(
                    session = self.shared.session_id,
                    limit = self.max_queue_length,
                    frame = frame.header.frame_count,
                    "reorder queue full, shedding frames"
                );
            }
            return;
        }
        self.shared.queue.push(frame);
    }

    fn ensure_drain(&self) {
        let mut handle = self.drain.lock().expect("drain handle lock poisoned");
        if handle.is_some() || self.is_finished() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("drain-{}", self.shared.session_id))
            .spawn(move || drain_loop(&shared));
        match spawned {
            Ok(joiner) => {
                self.shared.set_state(SessionState::Active);
                *handle = Some(joiner);
            }
            Err(error) => {
                // Retried on the next write.
                error!(session = self.shared.session_id, %error, "failed to spawn drain thread");
            }
        }
    }
}

// Dropping a session cancels its drain thread; the thread finishes its
// current iteration and exits before the sink is released.
impl Drop for OrderingStreamWriter {
    fn drop(&mut self) {
        self.cancel();
        self.finalize();
    }
}

fn drain_loop(shared: &WriterShared) {
    let mut rewrapper = StreamingRewrapper::new();
    let mut next_frame_count: u32 = 1;
    let mut last_frame_written: u32 = 0;

    while !shared.cancelled.load(Ordering::Relaxed) {
        match shared
            .queue
            .next_in_sequence(next_frame_count, last_frame_written)
        {
            SequencedPacket::Found(frame) if frame.header.eof => {
                finalize_transfer(shared, &frame.payload);
                return;
            }
            SequencedPacket::Found(frame) => {
                let frame_count = frame.header.frame_count;
                let payload = match shared.diode_type {
                    DiodeType::Import => {
                        match rewrapper.rewrap(frame.payload, frame_count) {
                            Ok(payload) => payload,
                            Err(error) => {
                                warn!(
                                    session = shared.session_id,
                                    frame = frame_count,
                                    %error,
                                    "dropping frame with invalid wrap header"
                                );
                                last_frame_written = frame_count;
                                next_frame_count += 1;
                                continue;
                            }
                        }
                    }
                    DiodeType::Basic => frame.payload,
                };

                let written = {
                    let mut sink = shared.sink.lock().expect("sink lock poisoned");
                    sink.write(&payload)
                };
                if let Err(error) = written {
                    error!(session = shared.session_id, %error, "sink write failed, aborting session");
                    abort_transfer(shared);
                    return;
                }
                last_frame_written = frame_count;
                next_frame_count += 1;
            }
            SequencedPacket::WaitOrEmpty | SequencedPacket::Discarded => {}
        }
    }

    // Cancelled: a timeout abort has already recorded its state.
    let _ = shared.state.compare_exchange(
        SessionState::Active as u8,
        SessionState::Closed as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    shared.finish();
}

fn finalize_transfer(shared: &WriterShared, descriptor: &[u8]) {
    shared.set_state(SessionState::Finalizing);
    let name = shared
        .filename_decoder
        .extract(descriptor)
        .unwrap_or_else(|| REJECTED_NAME.to_string());

    {
        let mut sink = shared.sink.lock().expect("sink lock poisoned");
        sink.set_name(name);
        if let Err(error) = sink.rename() {
            error!(session = shared.session_id, %error, "failed to promote staging output");
        }
    }
    shared.set_state(SessionState::Closed);
    shared.finish();
}

fn abort_transfer(shared: &WriterShared) {
    {
        let mut sink = shared.sink.lock().expect("sink lock poisoned");
        if let Err(error) = sink.delete() {
            warn!(session = shared.session_id, %error, "failed to discard staging output");
        }
    }
    shared.set_state(SessionState::Aborted);
    shared.finish();
}
