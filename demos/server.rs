//! Demo host - serves the core catalog plus a small "demo" extension.
//!
//! This example demonstrates:
//! - Loading `dfhack-config/remote-server.json` (written back on first run)
//! - Registering an extension catalog with typed handlers
//! - Answering `RunCommand` with a custom command runner
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example server
//! cargo run --example run_command -- echo hello
//! ```

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use dfhack_remote::config::CONFIG_PATH;
use dfhack_remote::handler::{flags, CallContext, HandlerResult, RpcService};
use dfhack_remote::protocol::{EmptyMessage, IntMessage, StringMessage};
use dfhack_remote::{Color, CommandResult, RemoteServer, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Host state touched by the demo functions.
#[derive(Default)]
struct Counter {
    value: AtomicI32,
}

impl Counter {
    fn add(&self, ctx: &mut CallContext<'_>, input: IntMessage) -> HandlerResult<IntMessage> {
        let value = self.value.fetch_add(input.value, Ordering::SeqCst) + input.value;
        ctx.print(&format!("counter is now {}\n", value));
        Ok(IntMessage { value })
    }

    fn get(&self, _ctx: &mut CallContext<'_>, _: EmptyMessage) -> HandlerResult<IntMessage> {
        Ok(IntMessage {
            value: self.value.load(Ordering::SeqCst),
        })
    }
}

fn run_command(ctx: &mut CallContext<'_>, command: &str, arguments: &[String]) -> CommandResult {
    match command {
        "help" => {
            ctx.print("Commands: help, echo <words>, warn <words>\n");
            CommandResult::Ok
        }
        "echo" => {
            ctx.print(&format!("{}\n", arguments.join(" ")));
            CommandResult::Ok
        }
        "warn" if !arguments.is_empty() => {
            ctx.add_text(Color::Yellow, &format!("{}\n", arguments.join(" ")));
            CommandResult::Ok
        }
        "warn" => CommandResult::WrongUsage,
        _ => {
            ctx.printerr(&format!("{} is not a recognized command.\n", command));
            CommandResult::NotImplemented
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load_and_sync(CONFIG_PATH);
    let counter = Arc::new(Counter::default());

    let server = RemoteServer::builder()
        .config(config)
        .command_runner(run_command)
        .service("demo", move || {
            let mut service = RpcService::new();
            let registered = service
                .add_method("Add", flags::NONE, Arc::clone(&counter), Counter::add)
                .and_then(|s| {
                    s.add_method("Get", flags::DONT_SUSPEND, Arc::clone(&counter), Counter::get)
                })
                .and_then(|s| {
                    s.add_function("Shout", flags::ALLOW_REMOTE, |_ctx, input: StringMessage| {
                        Ok(StringMessage {
                            value: input.value.to_uppercase(),
                        })
                    })
                });
            if let Err(e) = registered {
                tracing::error!("demo catalog: {}", e);
            }
            service
        })
        .build();

    let mut listener = server.start();
    let addr = listener.started().await?;
    println!("Listening on {} (Ctrl-C to stop)", addr);

    tokio::signal::ctrl_c().await?;
    server.coordinator().block_all();
    listener.shutdown();
    Ok(())
}
