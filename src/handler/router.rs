//! Router mapping `(interface, method)` to handlers.
//!
//! Handlers are plain synchronous functions: they may block, which is why
//! the parallel server strategies run them off the accept loop. A handler
//! that panics is caught here and answered with a `Failed` error reply.
//!
//! # Example
//!
//! ```
//! use busrpc::handler::Router;
//! use busrpc::message::{MethodCall, MethodReply};
//!
//! let mut router = Router::new();
//! router.register("com.example.HelloInterface", "Hello", |name: String| {
//!     Ok(format!("Hello {name}!\n"))
//! });
//!
//! let mut call = MethodCall::new(
//!     "com.example.HelloService",
//!     "/com/example/HelloService",
//!     "com.example.HelloInterface",
//!     "Hello",
//! )
//! .unwrap();
//! call.args_mut().push("World");
//!
//! match router.dispatch(&call) {
//!     MethodReply::Return(args) => {
//!         assert_eq!(args.get(0).and_then(|v| v.as_str()), Some("Hello World!\n"));
//!     }
//!     MethodReply::Error(e) => panic!("{e}"),
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{BusrpcError, MethodError};
use crate::message::{Args, FromArgs, IntoArgs, MethodCall, MethodReply};

/// Standard introspection interface.
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// Standard peer interface.
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

/// Result type for handler functions.
pub type HandlerResult<T> = std::result::Result<T, MethodError>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a call's arguments.
    fn call(&self, args: &Args) -> MethodReply;

    /// Signature of the expected arguments.
    fn in_signature(&self) -> String;

    /// Signature of the returned arguments.
    fn out_signature(&self) -> String;
}

/// Wrapper that decodes arguments before calling the handler.
pub struct TypedHandler<F, I, O>
where
    F: Fn(I) -> HandlerResult<O> + Send + Sync + 'static,
    I: FromArgs + 'static,
    O: IntoArgs + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<F, I, O> TypedHandler<F, I, O>
where
    F: Fn(I) -> HandlerResult<O> + Send + Sync + 'static,
    I: FromArgs + 'static,
    O: IntoArgs + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, I, O> Handler for TypedHandler<F, I, O>
where
    F: Fn(I) -> HandlerResult<O> + Send + Sync + 'static,
    I: FromArgs + 'static,
    O: IntoArgs + 'static,
{
    fn call(&self, args: &Args) -> MethodReply {
        let input = match I::from_args(args) {
            Ok(v) => v,
            Err(BusrpcError::Decode(detail)) => {
                return MethodReply::Error(MethodError::invalid_args(detail))
            }
            Err(e) => return MethodReply::Error(MethodError::invalid_args(e.to_string())),
        };

        match (self.handler)(input) {
            Ok(output) => MethodReply::Return(output.into_args()),
            Err(e) => MethodReply::Error(e),
        }
    }

    fn in_signature(&self) -> String {
        I::signature()
    }

    fn out_signature(&self) -> String {
        O::signature()
    }
}

/// Routing table of a server.
///
/// Built before the server starts and immutable afterwards (the server holds
/// it behind an `Arc`).
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<(String, String), Arc<dyn Handler>>,
    standard_interfaces: bool,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `Introspectable.Introspect` and `Peer.Ping` automatically.
    pub fn with_standard_interfaces(mut self, enabled: bool) -> Self {
        self.standard_interfaces = enabled;
        self
    }

    /// Enable or disable the standard interfaces.
    pub fn set_standard_interfaces(&mut self, enabled: bool) {
        self.standard_interfaces = enabled;
    }

    /// Register a typed handler. Re-registering a key overwrites it.
    pub fn register<F, I, O>(&mut self, interface: &str, method: &str, handler: F) -> &mut Self
    where
        F: Fn(I) -> HandlerResult<O> + Send + Sync + 'static,
        I: FromArgs + 'static,
        O: IntoArgs + 'static,
    {
        self.register_handler(interface, method, Arc::new(TypedHandler::new(handler)))
    }

    /// Register a handler object.
    pub fn register_handler(
        &mut self,
        interface: &str,
        method: &str,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        let key = (interface.to_string(), method.to_string());
        if self.routes.insert(key, handler).is_some() {
            tracing::debug!("Handler for {}.{} replaced", interface, method);
        }
        self
    }

    /// Check if a route exists.
    pub fn contains(&self, interface: &str, method: &str) -> bool {
        self.routes
            .contains_key(&(interface.to_string(), method.to_string()))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Produce the reply for an inbound call.
    ///
    /// Never fails: a missing route, bad arguments or a panicking handler
    /// all become error replies.
    pub fn dispatch(&self, call: &MethodCall) -> MethodReply {
        let key = (call.interface.clone(), call.member.clone());

        let Some(handler) = self.routes.get(&key) else {
            if self.standard_interfaces {
                if let Some(reply) = self.standard_reply(call) {
                    return reply;
                }
            }
            tracing::debug!(
                "No handler for {}.{} on {}",
                call.interface,
                call.member,
                call.path
            );
            return MethodReply::Error(MethodError::unknown_method());
        };

        match catch_unwind(AssertUnwindSafe(|| handler.call(&call.args))) {
            Ok(reply) => reply,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    "Handler {}.{} panicked: {}",
                    call.interface,
                    call.member,
                    detail
                );
                MethodReply::Error(MethodError::failed(format!("handler panicked: {detail}")))
            }
        }
    }

    fn standard_reply(&self, call: &MethodCall) -> Option<MethodReply> {
        match (call.interface.as_str(), call.member.as_str()) {
            (INTROSPECTABLE_INTERFACE, "Introspect") => {
                let mut args = Args::new();
                args.push(self.introspect());
                Some(MethodReply::Return(args))
            }
            (PEER_INTERFACE, "Ping") => Some(MethodReply::Return(Args::new())),
            _ => None,
        }
    }

    /// Introspection XML describing every route.
    pub fn introspect(&self) -> String {
        let mut interfaces: BTreeMap<&str, BTreeMap<&str, &Arc<dyn Handler>>> = BTreeMap::new();
        for ((interface, method), handler) in &self.routes {
            interfaces
                .entry(interface.as_str())
                .or_default()
                .insert(method.as_str(), handler);
        }

        let mut xml = String::from(
            "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n\
             \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n",
        );
        for (interface, methods) in interfaces {
            let _ = writeln!(xml, "  <interface name=\"{interface}\">");
            for (method, handler) in methods {
                let _ = writeln!(xml, "    <method name=\"{method}\">");
                for ty in split_signature(&handler.in_signature()) {
                    let _ = writeln!(xml, "      <arg direction=\"in\" type=\"{ty}\"/>");
                }
                for ty in split_signature(&handler.out_signature()) {
                    let _ = writeln!(xml, "      <arg direction=\"out\" type=\"{ty}\"/>");
                }
                xml.push_str("    </method>\n");
            }
            xml.push_str("  </interface>\n");
        }
        if self.standard_interfaces {
            xml.push_str(concat!(
                "  <interface name=\"org.freedesktop.DBus.Introspectable\">\n",
                "    <method name=\"Introspect\">\n",
                "      <arg direction=\"out\" type=\"s\"/>\n",
                "    </method>\n",
                "  </interface>\n",
                "  <interface name=\"org.freedesktop.DBus.Peer\">\n",
                "    <method name=\"Ping\"/>\n",
                "  </interface>\n",
            ));
        }
        xml.push_str("</node>\n");
        xml
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .routes
            .keys()
            .map(|(i, m)| format!("{i}.{m}"))
            .collect();
        keys.sort();
        f.debug_struct("Router")
            .field("routes", &keys)
            .field("standard_interfaces", &self.standard_interfaces)
            .finish()
    }
}

/// Split a signature into complete types (`"sa{su}"` -> `["s", "a{su}"]`).
fn split_signature(signature: &str) -> Vec<&str> {
    let mut types = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;

    for (i, c) in signature.char_indices() {
        match c {
            'a' => continue,
            '{' | '(' => {
                depth += 1;
                continue;
            }
            '}' | ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 {
            types.push(&signature[start..=i]);
            start = i + 1;
        }
    }
    types
}
