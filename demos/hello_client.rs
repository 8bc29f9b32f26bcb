//! Hello client - the call protocol step by step.
//!
//! Starts the hello service on the shared bus, then calls it three ways:
//! through the typed proxy, through `call_with` with explicit appender and
//! parser, and with a method that does not exist to show the error reply.
//!
//! ```text
//! cargo run --example hello_client -- --name World
//! ```

use std::time::Duration;

use anyhow::Result;
use busrpc::proxy::HelloProxy;
use busrpc::{hello, BusConnection, BusType, BusrpcError, Client, ClientConfig, Server, Strategy};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hello_client")]
#[command(about = "Call com.example.HelloService")]
struct Args {
    /// Name to greet
    #[arg(short, long, default_value = "World")]
    name: String,

    /// Bus to use (default: $BUSRPC_BUS, then session)
    #[arg(long)]
    bus: Option<BusType>,

    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 25_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let config = ClientConfig {
        bus: match args.bus {
            Some(bus) => bus,
            None => BusType::from_env()?,
        },
        timeout: Duration::from_millis(args.timeout_ms),
    };

    let server = Server::builder(BusConnection::connect(config.bus)?)
        .service_name(hello::SERVICE)
        .strategy(Strategy::Serial)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .start()
        .await?;

    let client = Client::with_config(BusConnection::connect(config.bus)?, &config);

    // 1. Typed proxy.
    let greeting = HelloProxy::new(client.clone()).hello(&args.name).await?;
    print!("proxy:     {greeting}");

    // 2. Explicit appender and parser.
    let greeting = client
        .call_with(
            hello::SERVICE,
            hello::PATH,
            hello::INTERFACE,
            hello::METHOD,
            |call_args| {
                call_args.push(args.name.as_str());
                Ok(())
            },
            |reply| {
                let mut reader = reply.reader();
                let text = reader.read_str()?.to_string();
                reader.finish()?;
                Ok(text)
            },
        )
        .await?;
    print!("call_with: {greeting}");

    // 3. Error reply.
    match client
        .call_unit(hello::SERVICE, hello::PATH, hello::INTERFACE, "Goodbye")
        .await
    {
        Err(BusrpcError::Remote(e)) => println!("Goodbye:   {} ({})", e.name, e.message),
        other => println!("Goodbye:   unexpected {other:?}"),
    }

    server.shutdown().await?;
    Ok(())
}
