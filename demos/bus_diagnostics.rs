//! Bus diagnostics - ask the bus about itself.
//!
//! Calls `org.freedesktop.DBus.Introspectable.Introspect` on `/` and
//! `org.freedesktop.DBus.Debug.Stats.GetStats` on `/org/freedesktop/DBus`.
//!
//! ```text
//! cargo run --example bus_diagnostics -- --bus system
//! ```

use anyhow::Result;
use busrpc::proxy::{DebugStatsProxy, IntrospectableProxy};
use busrpc::{BusConnection, BusType, Client};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bus_diagnostics")]
#[command(about = "Introspect the bus and print its statistics")]
struct Args {
    /// Bus to inspect (default: $BUSRPC_BUS, then session)
    #[arg(long)]
    bus: Option<BusType>,

    /// Skip the introspection XML
    #[arg(long)]
    stats_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let bus = match args.bus {
        Some(bus) => bus,
        None => BusType::from_env()?,
    };
    let client = Client::new(BusConnection::connect(bus)?);

    if !args.stats_only {
        let xml = IntrospectableProxy::bus(client.clone()).introspect().await?;
        println!("{xml}");
    }

    let mut stats: Vec<_> = DebugStatsProxy::new(client).get_stats().await?.into_iter().collect();
    stats.sort();
    for (key, value) in stats {
        println!("{key:>20} {value}");
    }
    Ok(())
}
