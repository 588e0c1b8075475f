//! Run one console command on a host and print its output.
//!
//! ```text
//! cargo run --example run_command -- echo hello
//! DFHACK_PORT=5001 cargo run --example run_command -- help
//! ```

use dfhack_remote::RemoteClient;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "help".to_string());
    let arguments: Vec<String> = args.collect();

    // Text frames are colored and written to stdout as they arrive.
    let mut client = RemoteClient::new();
    client.connect(0).await?;

    let status = client.run_command(&command, &arguments).await;
    client.disconnect().await;

    if !status.is_ok() {
        eprintln!("{}: {}", command, status);
        std::process::exit(1);
    }
    Ok(())
}
