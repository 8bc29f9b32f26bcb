//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use busrpc::bus::LocalBus;
use busrpc::{hello, BusConnection, Client, HandlerResult, Server, ServerHandle, Strategy};

pub const ECHO_INTERFACE: &str = "com.example.Echo";

/// Connect a fresh handle to `bus`.
pub fn connect(bus: &LocalBus) -> BusConnection {
    BusConnection::from_bus(bus.connect().expect("connect"))
}

/// Client on its own connection.
pub fn client(bus: &LocalBus) -> Client {
    Client::new(connect(bus)).with_timeout(Duration::from_secs(5))
}

/// `Sleep(ms: u) -> u`: block for `ms` milliseconds, return `ms`.
pub fn sleep_echo(ms: u32) -> HandlerResult<u32> {
    std::thread::sleep(Duration::from_millis(ms as u64));
    Ok(ms)
}

/// Hello service plus the echo helpers, under `strategy`.
pub async fn start_hello(bus: &LocalBus, strategy: Strategy) -> ServerHandle {
    Server::builder(connect(bus))
        .service_name(hello::SERVICE)
        .strategy(strategy)
        .standard_interfaces(true)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .route(ECHO_INTERFACE, "Sleep", sleep_echo)
        .route(ECHO_INTERFACE, "Panic", |_: ()| -> HandlerResult<()> {
            panic!("handler blew up")
        })
        .start()
        .await
        .expect("server start")
}

/// Every strategy offered.
pub fn strategies() -> [Strategy; 3] {
    [
        Strategy::Serial,
        Strategy::ThreadPerRequest,
        Strategy::TaskPool { max_concurrent: 4 },
    ]
}

/// Wait until `server` has accepted `count` calls.
pub async fn wait_served(server: &ServerHandle, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.served() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "server accepted {} of {} calls",
            server.served(),
            count
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
