//! One-shot client: send a message, print the server's answer.

use clap::Parser;
use shiftline::{Client, TransportKind};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shiftline-client")]
#[command(version = "0.1.0")]
#[command(about = "Send a message to a shiftline server for encoding/decoding", long_about = None)]
struct Args {
    /// Message (ASCII characters) to send
    #[arg(short, long, default_value = "Hello World")]
    message: String,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Transport: tcp, tcp4, or tcp6
    #[arg(short, long, default_value = "tcp")]
    proto: TransportKind,

    /// Seconds to wait for the connection and the response
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    debug!(addr = %args.addr, transport = %args.proto, "Connecting");
    let timeout = Duration::from_secs(args.timeout_secs);
    let mut client = Client::connect_with(&args.addr, args.proto, timeout).await?;
    let response = client.send(&args.message).await?;

    println!("Message returned: {response}");
    Ok(())
}
