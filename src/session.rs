//! Session table routing incoming frames to per-session writers.
//!
//! Sessions are created on first sight of a session id and retired on
//! completion or inactivity timeout. The timeout check happens on access
//! rather than from a background sweeper: a session only expires when
//! another frame arrives for it, which needs no timer infrastructure on a
//! link where silence is otherwise indistinguishable from completion.

use crate::frame::Frame;
use crate::sisl::DEFAULT_MAX_FILENAME_LENGTH;
use crate::stream::SinkFactory;
use crate::writer::{Clock, DiodeType, OrderingStreamWriter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

pub struct SessionManager {
    sessions: HashMap<u32, OrderingStreamWriter>,
    max_queue_length: usize,
    sink_factory: SinkFactory,
    clock: Clock,
    timeout_period: u64,
    diode_type: DiodeType,
}

impl SessionManager {
    pub fn new(
        max_queue_length: usize,
        sink_factory: SinkFactory,
        clock: Clock,
        timeout_period: u64,
        diode_type: DiodeType,
    ) -> Self {
        SessionManager {
            sessions: HashMap::new(),
            max_queue_length,
            sink_factory,
            clock,
            timeout_period,
            diode_type,
        }
    }

    /// Route one parsed frame. Creates the session on demand, retires it on
    /// timeout, and reaps it once its drain thread reports completion.
    ///
    /// Only the socket's receive path calls this, so the session table has
    /// a single writer; drain threads never touch it.
    pub fn accept(&mut self, frame: Frame) {
        let session_id = frame.header.session_id;
        if !self.sessions.contains_key(&session_id) && !self.create_session(session_id) {
            return;
        }

        if self.session_expired(session_id) {
            warn!(session = session_id, "session timed out, discarding staging output");
            if let Some(writer) = self.sessions.remove(&session_id) {
                writer.abort();
                writer.finalize();
            }
            return;
        }

        let finished = {
            let writer = &self.sessions[&session_id];
            writer.write(frame);
            writer.is_finished()
        };
        if finished {
            if let Some(writer) = self.sessions.remove(&session_id) {
                writer.finalize();
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Signal every drain thread and join them before the sinks drop.
    pub fn shutdown(&mut self) {
        for (_, writer) in self.sessions.drain() {
            writer.cancel();
            writer.finalize();
        }
    }

    fn create_session(&mut self, session_id: u32) -> bool {
        match (self.sink_factory)(session_id) {
            Ok(sink) => {
                self.sessions.insert(
                    session_id,
                    OrderingStreamWriter::new(
                        session_id,
                        self.max_queue_length,
                        sink,
                        Arc::clone(&self.clock),
                        self.diode_type,
                        DEFAULT_MAX_FILENAME_LENGTH,
                    ),
                );
                true
            }
            Err(error) => {
                error!(session = session_id, %error, "unable to open an output sink");
                false
            }
        }
    }

    fn session_expired(&self, session_id: u32) -> bool {
        self.sessions[&session_id].time_last_updated() + self.timeout_period < (self.clock)()
    }
}
