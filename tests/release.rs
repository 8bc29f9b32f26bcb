//! Every call and message is released exactly once, whatever stage fails.
//!
//! `CountingBus` wraps a local connection, attaches a tracked lease to every
//! call it composes, every reply it decodes for a caller and every message it
//! hands out or sends, and can be told to fail the send stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use busrpc::bus::{BoxFuture, Bus, Inbound, LocalBus, LocalConnection, NameFlags, PendingReply, RequestNameReply};
use busrpc::error::names;
use busrpc::message::{Lease, LeaseCounter, Message, MethodCall};
use busrpc::{hello, BusConnection, BusrpcError, Client, MethodError, Result, Server, Strategy};

struct CountingBus {
    inner: LocalConnection,
    leases: Arc<LeaseCounter>,
    replies: Arc<LeaseCounter>,
    fail_send: Arc<AtomicBool>,
}

/// Shared view on a `CountingBus` after it moved into a connection.
#[derive(Clone)]
struct Counters {
    leases: Arc<LeaseCounter>,
    replies: Arc<LeaseCounter>,
    fail_send: Arc<AtomicBool>,
}

impl CountingBus {
    fn new(bus: &LocalBus) -> (Self, Counters) {
        let counters = Counters {
            leases: LeaseCounter::new(),
            replies: LeaseCounter::new(),
            fail_send: Arc::new(AtomicBool::new(false)),
        };
        let counting = Self {
            inner: bus.connect().unwrap(),
            leases: counters.leases.clone(),
            replies: counters.replies.clone(),
            fail_send: counters.fail_send.clone(),
        };
        (counting, counters)
    }
}

impl Bus for CountingBus {
    fn unique_name(&self) -> &str {
        self.inner.unique_name()
    }

    fn request_name(&self, name: &str, flags: NameFlags) -> Result<RequestNameReply> {
        self.inner.request_name(name, flags)
    }

    fn release_name(&self, name: &str) -> Result<bool> {
        self.inner.release_name(name)
    }

    fn new_method_call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<MethodCall> {
        let call = self.inner.new_method_call(destination, path, interface, member)?;
        Ok(call.with_lease(Lease::tracked(&self.leases)))
    }

    fn send_with_reply(&self, call: MethodCall) -> Result<PendingReply> {
        if self.fail_send.load(Ordering::Acquire) {
            drop(call);
            return Err(BusrpcError::Send(MethodError::new(
                names::DISCONNECTED,
                "injected send failure",
            )));
        }
        self.inner
            .send_with_reply(call)
            .map(|pending| pending.track_reply(&self.replies))
    }

    fn send(&self, mut message: Message) -> Result<u32> {
        message.header_mut().lease = Lease::tracked(&self.leases);
        self.inner.send(message)
    }

    fn take_inbound(&self) -> Result<Box<dyn Inbound>> {
        Ok(Box::new(CountingInbound {
            inner: self.inner.take_inbound()?,
            leases: self.leases.clone(),
        }))
    }
}

struct CountingInbound {
    inner: Box<dyn Inbound>,
    leases: Arc<LeaseCounter>,
}

impl Inbound for CountingInbound {
    fn readable(&mut self) -> BoxFuture<'_, bool> {
        self.inner.readable()
    }

    fn pop(&mut self) -> Option<Message> {
        let mut message = self.inner.pop()?;
        message.header_mut().lease = Lease::tracked(&self.leases);
        Some(message)
    }
}

async fn hello_server(bus: &LocalBus) -> busrpc::ServerHandle {
    Server::builder(BusConnection::from_bus(bus.connect().unwrap()))
        .service_name(hello::SERVICE)
        .strategy(Strategy::Serial)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .start()
        .await
        .unwrap()
}

fn counting_client(bus: &LocalBus) -> (Client, Counters) {
    let (counting, counters) = CountingBus::new(bus);
    let client =
        Client::new(BusConnection::from_bus(counting)).with_timeout(Duration::from_secs(5));
    (client, counters)
}

fn assert_balanced(leases: &LeaseCounter, expected: usize) {
    assert_eq!(leases.acquired(), expected, "acquired");
    assert_eq!(leases.released(), expected, "released");
    assert_eq!(leases.outstanding(), 0);
}

#[tokio::test]
async fn test_success_releases_call_and_reply() {
    let bus = LocalBus::new();
    let server = hello_server(&bus).await;
    let (client, counters) = counting_client(&bus);

    let greeting: String = client
        .call(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, "World".to_string())
        .await
        .unwrap();
    assert_eq!(greeting, "Hello World!\n");
    assert_balanced(&counters.leases, 1);
    assert_balanced(&counters.replies, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_reply_is_released() {
    let bus = LocalBus::new();
    let server = hello_server(&bus).await;
    let (client, counters) = counting_client(&bus);

    let err = client
        .call_unit(hello::SERVICE, hello::PATH, hello::INTERFACE, "Goodbye")
        .await
        .unwrap_err();
    assert!(matches!(err, BusrpcError::Remote(_)));
    assert_balanced(&counters.leases, 1);
    assert_balanced(&counters.replies, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_compose_failure_acquires_nothing() {
    let bus = LocalBus::new();
    let (client, counters) = counting_client(&bus);

    let err = client
        .call_unit("not a bus name", hello::PATH, hello::INTERFACE, hello::METHOD)
        .await
        .unwrap_err();
    assert!(matches!(err, BusrpcError::Compose(_)));
    assert_balanced(&counters.leases, 0);
    assert_balanced(&counters.replies, 0);
}

#[tokio::test]
async fn test_append_failure_releases_unsent_call() {
    let bus = LocalBus::new();
    let (client, counters) = counting_client(&bus);

    let err = client
        .call_with(
            hello::SERVICE,
            hello::PATH,
            hello::INTERFACE,
            hello::METHOD,
            |_| Err(BusrpcError::Compose("argument rejected".to_string())),
            |_| Ok(()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BusrpcError::Compose(_)));
    assert_balanced(&counters.leases, 1);
    assert_balanced(&counters.replies, 0);
}

#[tokio::test]
async fn test_send_failure_releases_call() {
    let bus = LocalBus::new();
    let (client, counters) = counting_client(&bus);
    counters.fail_send.store(true, Ordering::Release);

    let err = client
        .call::<String, String>(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, "x".into())
        .await
        .unwrap_err();
    match &err {
        BusrpcError::Send(e) => assert!(e.is(names::DISCONNECTED)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        client.connection().last_error().map(|e| e.name),
        Some(names::DISCONNECTED.to_string())
    );
    assert_balanced(&counters.leases, 1);
    assert_balanced(&counters.replies, 0);
}

#[tokio::test]
async fn test_decode_failure_releases_call_and_reply() {
    let bus = LocalBus::new();
    let server = hello_server(&bus).await;
    let (client, counters) = counting_client(&bus);

    // Hello returns a string; asking for a number cannot parse.
    let err = client
        .call::<String, u32>(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, "x".into())
        .await
        .unwrap_err();
    assert!(matches!(err, BusrpcError::Decode(_)));
    assert_balanced(&counters.leases, 1);
    assert_balanced(&counters.replies, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_timeout_releases_call() {
    let bus = LocalBus::new();
    // Owns the name, never answers.
    let silent = bus.connect().unwrap();
    silent
        .request_name(hello::SERVICE, NameFlags::server())
        .unwrap();
    let _queue = silent.take_inbound().unwrap();

    let (client, counters) = counting_client(&bus);
    let client = client.with_timeout(Duration::from_millis(20));

    let err = client
        .call::<String, String>(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, "x".into())
        .await
        .unwrap_err();
    assert!(matches!(err, BusrpcError::Timeout(_)));
    assert_balanced(&counters.leases, 1);
    assert_balanced(&counters.replies, 0);
}

#[tokio::test]
async fn test_server_releases_inbound_calls_and_replies() {
    let bus = LocalBus::new();
    let (counting, counters) = CountingBus::new(&bus);

    let server = Server::builder(BusConnection::from_bus(counting))
        .service_name(hello::SERVICE)
        .strategy(Strategy::ThreadPerRequest)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .start()
        .await
        .unwrap();

    let client = Client::new(BusConnection::from_bus(bus.connect().unwrap()));
    for name in ["a", "b", "c"] {
        let greeting: String = client
            .call(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, name.to_string())
            .await
            .unwrap();
        assert_eq!(greeting, format!("Hello {name}!\n"));
    }
    // Unknown method still yields exactly one (error) reply.
    assert!(client
        .call_unit(hello::SERVICE, hello::PATH, hello::INTERFACE, "Nope")
        .await
        .is_err());

    server.shutdown().await.unwrap();

    // Four inbound calls and four replies.
    assert_balanced(&counters.leases, 8);
    assert_balanced(&counters.replies, 0);
}
