//! Batch several calls inside one suspend window.
//!
//! Start the `server` example first, then:
//!
//! ```text
//! cargo run --example suspend_batch
//! ```
//!
//! While the window is open no other client's suspending call runs, so
//! the three `Add` calls observe consecutive counter values.

use dfhack_remote::protocol::{EmptyMessage, IntMessage};
use dfhack_remote::{RemoteClient, RemoteFunction};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut client = RemoteClient::new();
    client.connect(0).await?;

    let mut add = RemoteFunction::<IntMessage, IntMessage>::new();
    add.bind(&mut client, "Add", "demo").await?;
    let mut get = RemoteFunction::<EmptyMessage, IntMessage>::new();
    get.bind(&mut client, "Get", "demo").await?;

    let token = client.suspend().await.map_err(|status| {
        format!("suspend refused: {}", status)
    })?;
    println!("suspended (depth {})", token.depth());

    for step in 1..=3 {
        match add.call(&mut client, &IntMessage { value: step }).await {
            Ok(reply) => println!("add {} -> {}", step, reply.value),
            Err(status) => eprintln!("add {} failed: {}", step, status),
        }
    }

    let remaining = client
        .resume(token)
        .await
        .map_err(|status| format!("resume refused: {}", status))?;
    println!("resumed (depth {})", remaining);

    if let Ok(total) = get.call(&mut client, &EmptyMessage {}).await {
        println!("final value {}", total.value);
    }

    client.disconnect().await;
    Ok(())
}
