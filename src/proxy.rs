//! Typed client wrappers for known services.
//!
//! Each proxy pins destination, path and interface so callers only pass the
//! method arguments.

use std::collections::HashMap;

use crate::bus::{DAEMON_NAME, DAEMON_PATH};
use crate::client::Client;
use crate::error::Result;
use crate::hello;

const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
const DEBUG_STATS: &str = "org.freedesktop.DBus.Debug.Stats";

/// Proxy for `com.example.HelloService`.
#[derive(Debug, Clone)]
pub struct HelloProxy {
    client: Client,
}

impl HelloProxy {
    /// Wrap a client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// `Hello(name) -> greeting`.
    pub async fn hello(&self, name: &str) -> Result<String> {
        self.client
            .call_with(
                hello::SERVICE,
                hello::PATH,
                hello::INTERFACE,
                hello::METHOD,
                |args| {
                    args.push(name);
                    Ok(())
                },
                |args| {
                    let mut reader = args.reader();
                    let greeting = reader.read_str()?.to_string();
                    reader.finish()?;
                    Ok(greeting)
                },
            )
            .await
    }
}

/// Proxy for `org.freedesktop.DBus.Introspectable` on any object.
#[derive(Debug, Clone)]
pub struct IntrospectableProxy {
    client: Client,
    destination: String,
    path: String,
}

impl IntrospectableProxy {
    /// Introspect `path` on `destination`.
    pub fn new(client: Client, destination: &str, path: &str) -> Self {
        Self {
            client,
            destination: destination.to_string(),
            path: path.to_string(),
        }
    }

    /// Introspect the bus itself, at `/`.
    pub fn bus(client: Client) -> Self {
        Self::new(client, DAEMON_NAME, "/")
    }

    /// Fetch the introspection XML.
    pub async fn introspect(&self) -> Result<String> {
        self.client
            .call(&self.destination, &self.path, INTROSPECTABLE, "Introspect", ())
            .await
    }
}

/// Proxy for the bus's `org.freedesktop.DBus.Debug.Stats` interface.
#[derive(Debug, Clone)]
pub struct DebugStatsProxy {
    client: Client,
}

impl DebugStatsProxy {
    /// Wrap a client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// `GetStats() -> a{su}`.
    pub async fn get_stats(&self) -> Result<HashMap<String, u32>> {
        self.client
            .call_with(
                DAEMON_NAME,
                DAEMON_PATH,
                DEBUG_STATS,
                "GetStats",
                |_| Ok(()),
                |args| {
                    let mut reader = args.reader();
                    let stats = reader.read::<HashMap<String, u32>>()?;
                    reader.finish()?;
                    Ok(stats)
                },
            )
            .await
    }
}
