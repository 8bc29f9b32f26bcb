//! Hello service - serve `com.example.HelloService` on the shared bus.
//!
//! The bus lives inside this process, so the demo also runs the callers:
//! it fires `--calls` concurrent `Hello` calls at the service, prints the
//! replies, then serves until Ctrl-C and shuts down cleanly.
//!
//! ```text
//! cargo run --example hello_service -- --strategy thread-per-request --calls 8
//! RUST_LOG=busrpc=debug cargo run --example hello_service
//! ```

use anyhow::Result;
use busrpc::proxy::HelloProxy;
use busrpc::{hello, BusConnection, BusType, Client, Server, Strategy};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Serial,
    ThreadPerRequest,
    TaskPool,
}

#[derive(Parser, Debug)]
#[command(name = "hello_service")]
#[command(about = "Serve com.example.HelloService on the local bus")]
struct Args {
    /// Bus to serve on (default: $BUSRPC_BUS, then session)
    #[arg(long)]
    bus: Option<BusType>,

    /// How concurrent calls are executed
    #[arg(long, value_enum, default_value = "task-pool")]
    strategy: StrategyArg,

    /// Bound for the task pool
    #[arg(long, default_value_t = busrpc::server::DEFAULT_MAX_CONCURRENT)]
    max_concurrent: usize,

    /// Calls to fire at the service before idling
    #[arg(long, default_value_t = 4)]
    calls: usize,

    /// Exit after the demo calls instead of waiting for Ctrl-C
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let bus = match args.bus {
        Some(bus) => bus,
        None => BusType::from_env()?,
    };
    let strategy = match args.strategy {
        StrategyArg::Serial => Strategy::Serial,
        StrategyArg::ThreadPerRequest => Strategy::ThreadPerRequest,
        StrategyArg::TaskPool => Strategy::TaskPool {
            max_concurrent: args.max_concurrent,
        },
    };

    let conn = BusConnection::connect(bus)?;
    let server = Server::builder(conn.clone())
        .service_name(hello::SERVICE)
        .strategy(strategy)
        .standard_interfaces(true)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .start()
        .await?;
    info!(
        "{} serving on the {} bus as {} ({})",
        hello::SERVICE,
        bus,
        server.unique_name(),
        strategy.name()
    );

    let proxy = HelloProxy::new(Client::new(BusConnection::connect(bus)?));
    let mut calls = Vec::new();
    for i in 0..args.calls {
        let proxy = proxy.clone();
        calls.push(tokio::spawn(async move {
            proxy.hello(&format!("caller {i}")).await
        }));
    }
    for call in calls {
        print!("{}", call.await??);
    }

    if !args.once {
        info!("Press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    let report = server.shutdown().await?;
    info!(
        "Stopped: {} calls served, {} replies sent, {} workers drained",
        report.served, report.replies.sent, report.drained
    );
    Ok(())
}
