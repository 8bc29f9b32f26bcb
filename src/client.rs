//! Client side of the call protocol.
//!
//! A call runs in strict sequence:
//! 1. Compose the call through the connection
//! 2. Append the arguments
//! 3. Send and wait for the reply (or the timeout)
//! 4. Parse the reply
//!
//! Each stage that fails is logged and returned as the matching [`BusrpcError`]
//! variant. The call and the reply are owned values, so they are released
//! on every path out of [`Client::call_with`], failure or not.
//!
//! # Example
//!
//! ```no_run
//! use busrpc::{BusConnection, BusType, Client};
//!
//! #[tokio::main]
//! async fn main() -> busrpc::Result<()> {
//!     let client = Client::new(BusConnection::connect(BusType::Session)?);
//!
//!     let greeting: String = client
//!         .call(
//!             "com.example.HelloService",
//!             "/com/example/HelloService",
//!             "com.example.HelloInterface",
//!             "Hello",
//!             "World".to_string(),
//!         )
//!         .await?;
//!
//!     print!("{greeting}");
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use crate::bus::{BusConnection, DEFAULT_CALL_TIMEOUT};
use crate::config::ClientConfig;
use crate::error::{BusrpcError, Result};
use crate::message::{Args, FromArgs, IntoArgs, MethodReply};

/// Issues calls over a shared connection.
#[derive(Debug, Clone)]
pub struct Client {
    conn: BusConnection,
    timeout: Duration,
}

impl Client {
    /// Create a client with the default 25 second timeout.
    pub fn new(conn: BusConnection) -> Self {
        Self {
            conn,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Create a client from a loaded configuration.
    pub fn with_config(conn: BusConnection, config: &ClientConfig) -> Self {
        Self::new(conn).with_timeout(config.timeout)
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The connection this client sends on.
    pub fn connection(&self) -> &BusConnection {
        &self.conn
    }

    /// Call a method with typed arguments and a typed result.
    pub async fn call<I, O>(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        method: &str,
        input: I,
    ) -> Result<O>
    where
        I: IntoArgs,
        O: FromArgs,
    {
        self.call_with(
            destination,
            path,
            interface,
            method,
            |args| {
                *args = input.into_args();
                Ok(())
            },
            O::from_args,
        )
        .await
    }

    /// Call a method, appending arguments and parsing the reply with the
    /// given closures.
    ///
    /// # Errors
    ///
    /// - [`BusrpcError::Compose`] - the call could not be built
    /// - any error returned by `append` (the call is not sent)
    /// - [`BusrpcError::Send`] / [`BusrpcError::Disconnected`] - the bus rejected the call
    /// - [`BusrpcError::Timeout`] - no reply in time
    /// - [`BusrpcError::Remote`] - the callee answered with an error reply
    /// - [`BusrpcError::Decode`] - `parse` rejected the reply's shape
    #[allow(clippy::too_many_arguments)]
    pub async fn call_with<T, A, P>(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        method: &str,
        append: A,
        parse: P,
    ) -> Result<T>
    where
        A: FnOnce(&mut Args) -> Result<()>,
        P: FnOnce(&Args) -> Result<T>,
    {
        let target = format!("{destination} {path} {interface}.{method}");

        let mut call = self
            .conn
            .new_method_call(destination, path, interface, method)
            .map_err(|e| {
                tracing::error!("Failed to compose {}: {}", target, e);
                e
            })?;

        if let Err(e) = append(call.args_mut()) {
            tracing::error!("Failed to append arguments for {}: {}", target, e);
            return Err(e);
        }

        let pending = self.conn.send_with_reply(call).map_err(|e| {
            tracing::error!("Failed to send {}: {}", target, e);
            e
        })?;

        let reply = pending.wait(self.timeout).await.map_err(|e| {
            tracing::error!("No reply for {}: {}", target, e);
            e
        })?;

        match &reply.body {
            MethodReply::Error(remote) => {
                tracing::error!("{} failed: {}", target, remote);
                self.conn.set_last_error(remote.clone());
                Err(BusrpcError::Remote(remote.clone()))
            }
            MethodReply::Return(args) => parse(args).map_err(|e| {
                let e = match e {
                    BusrpcError::Decode(_) => e,
                    other => BusrpcError::Decode(other.to_string()),
                };
                tracing::error!(
                    "Failed to parse reply to {} (signature \"{}\"): {}",
                    target,
                    args.signature(),
                    e
                );
                e
            }),
        }
    }

    /// Call a method that takes and returns nothing.
    pub async fn call_unit(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        method: &str,
    ) -> Result<()> {
        self.call(destination, path, interface, method, ()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, LocalBus, NameFlags};
    use crate::error::{names, MethodError};
    use crate::message::{Message, Reply};

    /// Answer every call on `conn` with whatever `answer` returns.
    fn echo_server(
        conn: crate::bus::LocalConnection,
        answer: impl Fn(&Args) -> MethodReply + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut inbound = conn.take_inbound().unwrap();
            while inbound.readable().await {
                if let Some(Message::MethodCall(call)) = inbound.pop() {
                    let body = answer(&call.args);
                    conn.send(Message::Reply(Reply::to(&call.reply_to(), body)))
                        .unwrap();
                }
            }
        })
    }

    #[test]
    fn test_with_config() {
        let bus = LocalBus::new();
        let config = ClientConfig::from_json(r#"{"timeout": 750}"#).unwrap();
        let client = Client::with_config(BusConnection::from_bus(bus.connect().unwrap()), &config);
        assert_eq!(client.timeout(), Duration::from_millis(750));
        assert_eq!(
            Client::new(BusConnection::from_bus(bus.connect().unwrap())).timeout(),
            DEFAULT_CALL_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_typed_call() {
        let bus = LocalBus::new();
        let server = bus.connect().unwrap();
        server
            .request_name("com.example.Echo", NameFlags::server())
            .unwrap();
        let _task = echo_server(server, |args| MethodReply::Return(args.clone()));

        let client = Client::new(BusConnection::from_bus(bus.connect().unwrap()));
        let out: (String, u32) = client
            .call("com.example.Echo", "/", "com.example.Echo", "Echo", ("x".to_string(), 5u32))
            .await
            .unwrap();
        assert_eq!(out, ("x".to_string(), 5));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let bus = LocalBus::new();
        let server = bus.connect().unwrap();
        let dest = server.unique_name().to_string();
        let _task = echo_server(server, |_| {
            MethodReply::Error(MethodError::unknown_method())
        });

        let client = Client::new(BusConnection::from_bus(bus.connect().unwrap()));
        let err = client
            .call_unit(&dest, "/", "com.example.Echo", "Nope")
            .await
            .unwrap_err();

        assert_eq!(err.as_remote(), Some(&MethodError::unknown_method()));
        assert_eq!(
            client.connection().last_error().map(|e| e.name),
            Some(names::UNKNOWN_METHOD.to_string())
        );
    }

    #[tokio::test]
    async fn test_parse_mismatch_is_decode_error() {
        let bus = LocalBus::new();
        let server = bus.connect().unwrap();
        let dest = server.unique_name().to_string();
        let _task = echo_server(server, |_| {
            let mut args = Args::new();
            args.push(7u32);
            MethodReply::Return(args)
        });

        let client = Client::new(BusConnection::from_bus(bus.connect().unwrap()));
        let err = client
            .call::<(), String>(&dest, "/", "com.example.Echo", "Echo", ())
            .await
            .unwrap_err();
        assert!(matches!(err, BusrpcError::Decode(_)));
    }

    #[tokio::test]
    async fn test_append_failure_stops_before_send() {
        let bus = LocalBus::new();
        let client = Client::new(BusConnection::from_bus(bus.connect().unwrap()));

        let err = client
            .call_with(
                "com.example.Nobody",
                "/",
                "com.example.I",
                "M",
                |_| Err(BusrpcError::Compose("cannot marshal".to_string())),
                |_| Ok(()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusrpcError::Compose(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let bus = LocalBus::new();
        let silent = bus.connect().unwrap();
        let _inbound = silent.take_inbound().unwrap();

        let client = Client::new(BusConnection::from_bus(bus.connect().unwrap()))
            .with_timeout(Duration::from_millis(20));
        let err = client
            .call_unit(silent.unique_name(), "/", "com.example.I", "M")
            .await
            .unwrap_err();
        assert!(matches!(err, BusrpcError::Timeout(_)));
    }
}
