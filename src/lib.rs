//! # busrpc
//!
//! Request/response RPC over a system message bus.
//!
//! A process can be a **client** (compose a call, send it, wait for the
//! reply, parse a typed result) and/or a **server** (own a service name,
//! accept calls, route them to handlers, reply).
//!
//! ## Architecture
//!
//! ```text
//! Client ─► BusConnection ─► bus ─► BusConnection ─► accept loop
//!                                                       │
//!                                  strategy ◄───────────┘
//!                                     │
//!                                  Router ─► handler ─► MethodReply
//!                                                          │
//! Client ◄─ BusConnection ◄─ bus ◄─ BusConnection ◄─ reply writer
//! ```
//!
//! - **[`bus`]**: the [`Bus`](bus::Bus) capability trait, the shared
//!   [`BusConnection`] handle and the in-process [`LocalBus`](bus::LocalBus)
//! - **[`message`]**: calls, replies and their typed arguments
//! - **[`handler`]**: the [`Router`]
//! - **[`server`]**: the accept loop and its concurrency [`Strategy`]
//!
//! ## Example
//!
//! ```
//! use busrpc::bus::LocalBus;
//! use busrpc::{hello, BusConnection, Client, Server, Strategy};
//!
//! #[tokio::main]
//! async fn main() -> busrpc::Result<()> {
//!     let bus = LocalBus::new();
//!
//!     let server = Server::builder(BusConnection::from_bus(bus.connect()?))
//!         .service_name(hello::SERVICE)
//!         .strategy(Strategy::Serial)
//!         .route(hello::INTERFACE, hello::METHOD, hello::hello)
//!         .start()
//!         .await?;
//!
//!     let client = Client::new(BusConnection::from_bus(bus.connect()?));
//!     let greeting: String = client
//!         .call(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, "World".to_string())
//!         .await?;
//!     assert_eq!(greeting, "Hello World!\n");
//!
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod hello;
pub mod message;
pub mod proxy;
pub mod server;
pub mod writer;

mod client;

pub use bus::{BusConnection, BusType, NameFlags};
pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{BusrpcError, MethodError, Result};
pub use handler::{HandlerResult, Router};
pub use message::{Args, MethodCall, MethodReply};
pub use server::{Server, ServerBuilder, ServerHandle, ServerState, ShutdownReport, Strategy};
