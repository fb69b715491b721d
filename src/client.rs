// ABOUTME: Sender side of the diode link: chunks a file into numbered frames
// ABOUTME: and emits them over UDP at a paced rate

use crate::frame::{self, FrameHeader};
use crate::sisl::{self, DEFAULT_MAX_FILENAME_LENGTH};
use bytes::{BufMut, BytesMut};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::info;

#[derive(Debug, Error)]
pub enum DiodeClientError {
    #[error("invalid filename {name:?}: {reason}")]
    InvalidFilename { name: String, reason: &'static str },

    #[error(transparent)]
    Frame(#[from] frame::FrameError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Interval between frame emissions for a target rate, or `None` to send as
/// fast as possible.
pub fn timer_period(mtu: u16, data_rate_mbps: f64) -> Option<Duration> {
    if data_rate_mbps <= 0.0 {
        return None;
    }
    let micros = (f64::from(mtu) * 8.0 * 1_000_000.0 / (data_rate_mbps * 1024.0 * 1024.0)).round();
    Some(Duration::from_micros(micros as u64))
}

/// The transfer name a path would be stored under, validated against the
/// receiver's filename rules before any network activity.
pub fn transfer_name(path: &Path) -> Result<String, DiodeClientError> {
    let display = path.display().to_string();
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(DiodeClientError::InvalidFilename {
            name: display.clone(),
            reason: "path has no UTF-8 file name",
        })?;
    if !sisl::valid_filename(name) {
        return Err(DiodeClientError::InvalidFilename {
            name: display,
            reason: "only alphanumerics, dots, dashes and underscores are allowed",
        });
    }
    if name.len() > DEFAULT_MAX_FILENAME_LENGTH {
        return Err(DiodeClientError::InvalidFilename {
            name: display,
            reason: "longer than 65 characters",
        });
    }
    Ok(name.to_string())
}

/// Sender: frames a file and emits it to a fixed receiver.
pub struct DiodeClient {
    socket: UdpSocket,
    max_payload_size: usize,
    period: Option<Duration>,
}

impl DiodeClient {
    pub async fn connect(
        address: &str,
        port: u16,
        mtu: u16,
        data_rate_mbps: f64,
    ) -> Result<Self, DiodeClientError> {
        let max_payload_size = frame::max_payload_size(mtu)?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((address, port)).await?;
        Ok(DiodeClient {
            socket,
            max_payload_size,
            period: timer_period(mtu, data_rate_mbps),
        })
    }

    /// Send one file: payload-sized chunks under a random session id with a
    /// monotone sequence number, then a terminator frame whose payload
    /// names the transfer.
    pub async fn send_file(&self, path: &Path) -> Result<(), DiodeClientError> {
        let name = transfer_name(path)?;
        let mut file = File::open(path).await?;
        let session_id: u32 = rand::random();
        info!(session = session_id, file = %name, "starting transfer");

        let mut ticker = self.period.map(time::interval);
        let mut frame_count: u32 = 0;
        let mut chunk = vec![0u8; self.max_payload_size];
        loop {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }
            frame_count += 1;

            let len = read_chunk(&mut file, &mut chunk).await?;
            if len == 0 {
                let descriptor = format!("{{name: !str \"{name}\"}}");
                self.send_frame(session_id, frame_count, true, descriptor.as_bytes())
                    .await?;
                break;
            }
            self.send_frame(session_id, frame_count, false, &chunk[..len])
                .await?;
        }

        info!(session = session_id, frames = frame_count, "transfer complete");
        Ok(())
    }

    async fn send_frame(
        &self,
        session_id: u32,
        frame_count: u32,
        eof: bool,
        payload: &[u8],
    ) -> io::Result<()> {
        let mut datagram = BytesMut::with_capacity(frame::HEADER_SIZE + payload.len());
        FrameHeader {
            session_id,
            frame_count,
            eof,
        }
        .encode_into(&mut datagram);
        datagram.put_slice(payload);
        self.socket.send(&datagram).await?;
        Ok(())
    }
}

/// Fill `buf` from the file, short only at end of input.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_period_follows_mtu_and_rate() {
        assert_eq!(
            timer_period(1500, 1.0),
            Some(Duration::from_micros(11444))
        );
        assert_eq!(timer_period(1500, 100.0), Some(Duration::from_micros(114)));
        assert_eq!(timer_period(9000, 10.0), Some(Duration::from_micros(6866)));
    }

    #[test]
    fn zero_rate_means_unpaced() {
        assert_eq!(timer_period(1500, 0.0), None);
        assert_eq!(timer_period(1500, -3.0), None);
    }

    #[test]
    fn transfer_name_takes_the_basename() {
        let name = transfer_name(Path::new("/var/spool/outbound/report_2021.tar.gz")).unwrap();
        assert_eq!(name, "report_2021.tar.gz");
    }

    #[test]
    fn transfer_name_rejects_disallowed_characters() {
        let result = transfer_name(Path::new("/tmp/bad name.txt"));
        assert!(matches!(
            result,
            Err(DiodeClientError::InvalidFilename { .. })
        ));
    }

    #[test]
    fn transfer_name_rejects_overlong_names() {
        let long = format!("/tmp/{}", "a".repeat(DEFAULT_MAX_FILENAME_LENGTH + 1));
        let result = transfer_name(Path::new(&long));
        assert!(matches!(
            result,
            Err(DiodeClientError::InvalidFilename { .. })
        ));

        let just_fits = format!("/tmp/{}", "a".repeat(DEFAULT_MAX_FILENAME_LENGTH));
        assert!(transfer_name(Path::new(&just_fits)).is_ok());
    }
}
