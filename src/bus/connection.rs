//! Shared bus connection handle.
//!
//! A [`BusConnection`] is cheap to clone; every clone borrows the same
//! underlying connection. Nothing closes it explicitly: the connection is
//! released when the last clone is dropped, which is what lets a client and
//! a server share one connection without either tearing it down under the
//! other.
//!
//! All writes go through the connection's write lock, so concurrent senders
//! (client calls, reply writers) never interleave on the transport.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Bus, BusType, Inbound, LocalBus, NameFlags, PendingReply, RequestNameReply};
use crate::error::{names, BusrpcError, MethodError, Result};
use crate::message::{Message, MethodCall};

struct ConnectionInner {
    bus: Box<dyn Bus>,
    write_lock: Mutex<()>,
    last_error: Mutex<Option<MethodError>>,
}

/// Shared handle on one bus connection.
#[derive(Clone)]
pub struct BusConnection {
    inner: Arc<ConnectionInner>,
}

impl BusConnection {
    /// Connect to the process-wide local bus of the given type.
    ///
    /// # Errors
    ///
    /// [`BusrpcError::Connection`] if the bus is not running.
    pub fn connect(bus_type: BusType) -> Result<Self> {
        let conn = LocalBus::shared(bus_type).connect().map_err(|e| {
            tracing::error!("Cannot connect to the {} bus: {}", bus_type, e);
            e
        })?;
        tracing::debug!("Connected to the {} bus as {}", bus_type, conn.unique_name());
        Ok(Self::from_bus(conn))
    }

    /// Wrap any bus implementation.
    pub fn from_bus<B: Bus>(bus: B) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                bus: Box::new(bus),
                write_lock: Mutex::new(()),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Unique name of this connection.
    pub fn unique_name(&self) -> &str {
        self.inner.bus.unique_name()
    }

    /// Request a well-known name.
    pub fn request_name(&self, name: &str, flags: NameFlags) -> Result<RequestNameReply> {
        self.record(self.inner.bus.request_name(name, flags))
    }

    /// Request a well-known name and fail unless it is owned afterwards.
    ///
    /// # Errors
    ///
    /// [`BusrpcError::Name`] if another connection keeps the name.
    pub fn acquire_name(&self, name: &str, flags: NameFlags) -> Result<()> {
        let reply = self.request_name(name, flags)?;
        if reply.is_owner() {
            return Ok(());
        }

        let err = BusrpcError::Name {
            name: name.to_string(),
            reason: match reply {
                RequestNameReply::InQueue => "queued behind the current owner".to_string(),
                _ => "owned by another connection that does not allow replacement".to_string(),
            },
        };
        self.set_last_error(MethodError::new(names::FAILED, err.to_string()));
        Err(err)
    }

    /// Release a well-known name.
    pub fn release_name(&self, name: &str) -> Result<bool> {
        self.record(self.inner.bus.release_name(name))
    }

    /// Compose a method call through the bus.
    pub fn new_method_call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<MethodCall> {
        self.record(
            self.inner
                .bus
                .new_method_call(destination, path, interface, member),
        )
    }

    /// Send a call, serialized with every other write on this connection.
    pub fn send_with_reply(&self, call: MethodCall) -> Result<PendingReply> {
        let result = {
            let _guard = self.inner.write_lock.lock();
            self.inner.bus.send_with_reply(call)
        };
        self.record(result)
    }

    /// Send a message, serialized with every other write on this connection.
    pub fn send(&self, message: Message) -> Result<u32> {
        let result = {
            let _guard = self.inner.write_lock.lock();
            self.inner.bus.send(message)
        };
        self.record(result)
    }

    /// Claim the inbound queue (one reader per connection).
    pub fn take_inbound(&self) -> Result<Box<dyn Inbound>> {
        self.inner.bus.take_inbound()
    }

    /// Last error observed on this connection.
    pub fn last_error(&self) -> Option<MethodError> {
        self.inner.last_error.lock().clone()
    }

    /// Number of live handles on this connection.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn set_last_error(&self, error: MethodError) {
        *self.inner.last_error.lock() = Some(error);
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            let error = match e {
                BusrpcError::Send(inner) | BusrpcError::Remote(inner) => inner.clone(),
                other => MethodError::new(names::FAILED, other.to_string()),
            };
            self.set_last_error(error);
        }
        result
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("unique_name", &self.unique_name())
            .finish()
    }
}
