// ABOUTME: Entry point for the send side of the diode: validates the
// ABOUTME: transfer name, then frames and emits the file at the target rate

use argh::FromArgs;
use diode::DiodeClient;
use diode::client::transfer_name;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// One-way diode file transfer client.
#[derive(FromArgs)]
struct ClientArgs {
    /// name of the file to send
    #[argh(option, short = 'f')]
    filename: String,

    /// address to send frames to
    #[argh(option, short = 'a')]
    address: String,

    /// port to send frames to
    #[argh(option, short = 'c')]
    client_port: u16,

    /// MTU size of the network interface - default 1500
    #[argh(option, short = 'm', default = "1500")]
    mtu: u16,

    /// data rate of transfer in Mbit/s - default as fast as possible
    #[argh(option, short = 'r', default = "0.0")]
    datarate: f64,

    /// logging level for program output - default info
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    log_level: String,
}

#[tokio::main]
async fn main() -> diode::Result<()> {
    let args: ClientArgs = argh::from_env();

    let level: Level = args
        .log_level
        .parse()
        .map_err(|_| format!("unknown log level {:?}", args.log_level))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Fail on a bad transfer name before any network activity.
    let path = PathBuf::from(&args.filename);
    transfer_name(&path)?;

    info!("starting diode client");
    let client = DiodeClient::connect(&args.address, args.client_port, args.mtu, args.datarate).await?;
    client.send_file(&path).await?;
    Ok(())
}
