// ABOUTME: UDP receive loop feeding datagrams into the session manager and
// ABOUTME: driving an orderly drain-thread shutdown on exit

use crate::frame::{self, Frame};
use crate::session::SessionManager;
use bytes::Bytes;
use std::future::Future;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Receive side of the diode: parses datagrams and routes them into the
/// session table.
pub struct Server {
    sessions: SessionManager,
    max_payload_size: usize,
}

impl Server {
    pub fn new(sessions: SessionManager, mtu: u16) -> Result<Self, frame::FrameError> {
        Ok(Server {
            sessions,
            max_payload_size: frame::max_payload_size(mtu)?,
        })
    }

    /// Parse one datagram and route it. Malformed datagrams are dropped;
    /// they never disturb existing sessions.
    pub fn receive_packet(&mut self, datagram: Bytes) {
        match Frame::decode(datagram, self.max_payload_size) {
            Ok(frame) => self.sessions.accept(frame),
            Err(error) => warn!(%error, "dropping malformed datagram"),
        }
    }

    /// Run the receive loop until `shutdown` resolves, then signal and join
    /// every session's drain thread before the sinks are released.
    pub async fn run(
        mut self,
        socket: UdpSocket,
        shutdown: impl Future<Output = ()>,
    ) -> crate::Result<()> {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; self.max_payload_size + frame::HEADER_SIZE];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (len, _peer) = received?;
                    self.receive_packet(Bytes::copy_from_slice(&buf[..len]));
                }
                () = &mut shutdown => break,
            }
        }
        info!("shutting down, draining open sessions");
        self.sessions.shutdown();
        Ok(())
    }
}
