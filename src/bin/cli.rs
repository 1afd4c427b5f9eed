use std::time::Duration;

use clap::Parser;
use resplite::connection::{Connection, Error};
use resplite::Command;
use tracing::debug;

const ADDRESS: &str = "127.0.0.1:6379";
const DIAL_TIMEOUT_SECS: u64 = 5;

/// Sends a single command and prints the reply.
#[derive(Parser, Debug)]
struct Args {
    /// The server address to connect to
    #[arg(short, long, env = "RESPLITE_ADDRESS", default_value = ADDRESS)]
    address: String,

    /// Dial timeout in seconds
    #[arg(short, long, default_value_t = DIAL_TIMEOUT_SECS)]
    timeout: u64,

    /// The command and its arguments, e.g. `GET mykey`
    #[arg(required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();

    let mut conn =
        Connection::connect(args.address.as_str(), Duration::from_secs(args.timeout)).await?;

    conn.send_command(Command::new(args.command)).await?;
    let reply = conn.read_reply().await?;
    println!("{}", reply);

    conn.close().await
}
