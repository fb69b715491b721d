// ABOUTME: Entry point for the receive side of the diode: binds the UDP
// ABOUTME: socket, builds the session manager and runs until interrupted

use argh::FromArgs;
use diode::stream::{DropStream, FileStream, SinkFactory, StreamSink};
use diode::writer::DiodeType;
use diode::{Server, SessionManager};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Seconds of inactivity after which a session's staging output is
/// discarded on the next arrival.
const SESSION_TIMEOUT_SECS: u64 = 15;

/// One-way diode file transfer server.
#[derive(FromArgs)]
struct ServerArgs {
    /// port to listen for frames on - default 45000
    #[argh(option, short = 's', default = "45000")]
    server_port: u16,

    /// MTU size of the network interface - default 1500
    #[argh(option, short = 'm', default = "1500")]
    mtu: u16,

    /// max length of the per-session reordering queue - default 1024 frames
    #[argh(option, short = 'q', default = "1024")]
    queue_length: usize,

    /// diagnostic: count received payloads instead of writing them to disk
    #[argh(switch, short = 'd')]
    drop_packets: bool,

    /// rewrap CloakedDagger payloads before writing (import diode)
    #[argh(switch, short = 'i')]
    import_diode: bool,
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn sink_factory(drop_packets: bool) -> SinkFactory {
    if drop_packets {
        Box::new(|session_id| Ok(Box::new(DropStream::new(session_id)) as Box<dyn StreamSink>))
    } else {
        Box::new(|session_id| Ok(Box::new(FileStream::new(session_id, ".")?) as Box<dyn StreamSink>))
    }
}

#[tokio::main]
async fn main() -> diode::Result<()> {
    let args: ServerArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let diode_type = if args.import_diode {
        DiodeType::Import
    } else {
        DiodeType::Basic
    };
    let sessions = SessionManager::new(
        args.queue_length,
        sink_factory(args.drop_packets),
        Arc::new(wall_clock),
        SESSION_TIMEOUT_SECS,
        diode_type,
    );
    let server = Server::new(sessions, args.mtu)?;

    let socket = UdpSocket::bind(("0.0.0.0", args.server_port)).await?;
    info!(port = args.server_port, mtu = args.mtu, "diode server listening");

    server
        .run(socket, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, stopping server");
        })
        .await
}
