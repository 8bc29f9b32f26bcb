//! End-to-end tests over the local bus.

mod common;

use std::sync::Arc;
use std::time::Duration;

use busrpc::bus::{Bus, LocalBus, NameFlags};
use busrpc::error::names;
use busrpc::proxy::{DebugStatsProxy, HelloProxy, IntrospectableProxy};
use busrpc::{hello, BusrpcError, HandlerResult, Server, ServerState, Strategy};
use parking_lot::Mutex;

use common::{client, connect, start_hello, strategies, wait_served, ECHO_INTERFACE};

fn remote_name(err: BusrpcError) -> String {
    match err {
        BusrpcError::Remote(e) => e.name,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hello_round_trip() {
    for strategy in strategies() {
        let bus = LocalBus::new();
        let server = start_hello(&bus, strategy).await;

        let greeting = HelloProxy::new(client(&bus)).hello("World").await.unwrap();
        assert_eq!(greeting, "Hello World!\n", "strategy {}", strategy.name());

        server.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_method() {
    let bus = LocalBus::new();
    let server = start_hello(&bus, Strategy::default()).await;
    let client = client(&bus);

    let err = client
        .call_unit(hello::SERVICE, hello::PATH, hello::INTERFACE, "Goodbye")
        .await
        .unwrap_err();
    match &err {
        BusrpcError::Remote(e) => {
            assert!(e.is(names::UNKNOWN_METHOD));
            assert_eq!(e.message, "Method not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Still serving.
    let greeting = HelloProxy::new(client).hello("again").await.unwrap();
    assert_eq!(greeting, "Hello again!\n");
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_args_keeps_serving() {
    let bus = LocalBus::new();
    let server = start_hello(&bus, Strategy::ThreadPerRequest).await;
    let client = client(&bus);

    let err = client
        .call::<u32, String>(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, 42)
        .await
        .unwrap_err();
    assert_eq!(remote_name(err), names::INVALID_ARGS);

    let err = client
        .call::<(String, String), String>(
            hello::SERVICE,
            hello::PATH,
            hello::INTERFACE,
            hello::METHOD,
            ("a".to_string(), "b".to_string()),
        )
        .await
        .unwrap_err();
    assert_eq!(remote_name(err), names::INVALID_ARGS);

    let greeting: String = client
        .call(hello::SERVICE, hello::PATH, hello::INTERFACE, hello::METHOD, "ok".to_string())
        .await
        .unwrap();
    assert_eq!(greeting, "Hello ok!\n");
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_panic_becomes_failed() {
    for strategy in strategies() {
        let bus = LocalBus::new();
        let server = start_hello(&bus, strategy).await;
        let client = client(&bus);

        let err = client
            .call_unit(hello::SERVICE, hello::PATH, ECHO_INTERFACE, "Panic")
            .await
            .unwrap_err();
        assert_eq!(remote_name(err), names::FAILED);

        let greeting = HelloProxy::new(client).hello("still here").await.unwrap();
        assert_eq!(greeting, "Hello still here!\n");
        server.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_service_unknown() {
    let bus = LocalBus::new();
    let err = HelloProxy::new(client(&bus)).hello("World").await.unwrap_err();
    assert_eq!(remote_name(err), names::SERVICE_UNKNOWN);
}

#[tokio::test]
async fn test_vanished_server_yields_no_reply() {
    let bus = LocalBus::new();
    let server = bus.connect().unwrap();
    server
        .request_name(hello::SERVICE, NameFlags::server())
        .unwrap();
    let mut inbound = server.take_inbound().unwrap();

    let proxy = HelloProxy::new(client(&bus));
    let call = tokio::spawn(async move { proxy.hello("World").await });

    // Receive the call, then go away without answering.
    assert!(inbound.readable().await);
    assert!(inbound.pop().is_some());
    drop(inbound);
    drop(server);

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(remote_name(err), names::NO_REPLY);
}

#[tokio::test]
async fn test_serial_is_fifo() {
    let bus = LocalBus::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();

    let server = Server::builder(connect(&bus))
        .service_name("com.example.Fifo")
        .strategy(Strategy::Serial)
        .route("com.example.Fifo", "Push", move |n: u32| -> HandlerResult<u32> {
            // Earlier calls take longer; a parallel server would reorder them.
            std::thread::sleep(Duration::from_millis((10 - n as u64) * 2));
            seen.lock().push(n);
            Ok(n)
        })
        .start()
        .await
        .unwrap();

    let caller = bus.connect().unwrap();
    let mut pending = Vec::new();
    for n in 0..10u32 {
        let mut call = caller
            .new_method_call("com.example.Fifo", "/", "com.example.Fifo", "Push")
            .unwrap();
        call.args_mut().push(n);
        pending.push(caller.send_with_reply(call).unwrap());
    }

    for (n, reply) in pending.into_iter().enumerate() {
        let reply = reply.wait(Duration::from_secs(5)).await.unwrap();
        let args = reply.body.into_result().unwrap();
        assert_eq!(args.get(0).and_then(|v| v.as_u32()), Some(n as u32));
    }
    assert_eq!(*order.lock(), (0..10).collect::<Vec<u32>>());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_reply_expected_calls_are_served_silently() {
    let bus = LocalBus::new();
    let hits = Arc::new(Mutex::new(0u32));
    let counter = hits.clone();

    let server = Server::builder(connect(&bus))
        .service_name("com.example.Notify")
        .strategy(Strategy::Serial)
        .route("com.example.Notify", "Poke", move |_: ()| {
            *counter.lock() += 1;
            Ok(())
        })
        .start()
        .await
        .unwrap();

    let conn = connect(&bus);
    let call = conn
        .new_method_call("com.example.Notify", "/", "com.example.Notify", "Poke")
        .unwrap()
        .with_no_reply();
    conn.send(busrpc::message::Message::MethodCall(call)).unwrap();
    wait_served(&server, 1).await;

    let report = server.shutdown().await.unwrap();
    assert_eq!(report.served, 1);
    assert_eq!(report.replies.sent, 0);
    assert_eq!(*hits.lock(), 1);
}

#[tokio::test]
async fn test_standard_interfaces_and_bus_diagnostics() {
    let bus = LocalBus::new();
    let server = start_hello(&bus, Strategy::Serial).await;

    let xml = IntrospectableProxy::new(client(&bus), hello::SERVICE, hello::PATH)
        .introspect()
        .await
        .unwrap();
    assert!(xml.contains("<interface name=\"com.example.HelloInterface\">"));
    assert!(xml.contains("<method name=\"Hello\">"));

    let bus_xml = IntrospectableProxy::bus(client(&bus)).introspect().await.unwrap();
    assert!(bus_xml.contains("org.freedesktop.DBus.Debug.Stats"));

    let stats = DebugStatsProxy::new(client(&bus)).get_stats().await.unwrap();
    assert_eq!(stats.get("BusNames"), Some(&1));
    assert!(stats.get("ActiveConnections").copied().unwrap_or(0) >= 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_name_taken_never_accepts() {
    let bus = LocalBus::new();
    let first = start_hello(&bus, Strategy::Serial).await;

    let second = Server::builder(connect(&bus))
        .service_name(hello::SERVICE)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .build();
    let mut states = second.subscribe();

    let err = second.start().await.unwrap_err();
    assert!(matches!(err, BusrpcError::Name { .. }));
    assert!(states.has_changed().unwrap_or(true));
    assert_eq!(*states.borrow_and_update(), ServerState::Failed);

    // The original owner is unaffected.
    assert_eq!(
        bus.name_owner(hello::SERVICE).as_deref(),
        Some(first.unique_name())
    );
    first.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shared_connection_for_client_and_server() {
    let bus = LocalBus::new();
    let conn = connect(&bus);

    let server = Server::builder(conn.clone())
        .service_name(hello::SERVICE)
        .strategy(Strategy::Serial)
        .route(hello::INTERFACE, hello::METHOD, hello::hello)
        .start()
        .await
        .unwrap();

    let proxy = HelloProxy::new(busrpc::Client::new(conn.clone()));
    assert_eq!(proxy.hello("me").await.unwrap(), "Hello me!\n");

    server.shutdown().await.unwrap();
    // The client's handles keep the connection alive.
    assert!(conn.handle_count() >= 1);
    assert_eq!(bus.connection_count(), 1);
}
