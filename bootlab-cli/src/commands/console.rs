use anyhow::Context;
use bootlab::{ConsoleRelay, RelayExit, RelayOptions};
use clap::Args;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    /// Serial bridge address, e.g. "lab-serial:4001"
    pub address: String,

    /// Delay between bytes sent to the board
    #[arg(long, default_value_t = 5)]
    pub tx_interval_ms: u64,
}

pub async fn execute(args: ConsoleArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let stream = TcpStream::connect(&args.address)
        .await
        .with_context(|| format!("failed to connect to {}", args.address))?;
    stream.set_nodelay(true)?;

    let relay = ConsoleRelay::new(RelayOptions {
        tx_interval: Duration::from_millis(args.tx_interval_ms),
        ..Default::default()
    });
    eprintln!("Connected to {}. Type Ctrl-] twice to exit.", args.address);

    match relay.run_stdio(stream).await? {
        RelayExit::Disconnected => eprintln!("Disconnected"),
        RelayExit::RemoteClosed => eprintln!("Connection closed by {}", args.address),
    }
    Ok(())
}
