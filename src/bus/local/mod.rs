//! In-process bus substrate.
//!
//! [`LocalBus`] plays the part of a bus daemon for peers living in the same
//! process:
//!
//! - hands out connections with unique names (`:1.1`, `:1.2`, ...)
//! - arbitrates well-known name ownership, with an owner queue
//! - routes calls by destination and replies by `(destination, reply_serial)`
//! - answers with `ServiceUnknown` for unowned names and `NoReply` when the
//!   callee disappears with the call outstanding
//! - serves the `org.freedesktop.DBus` diagnostic methods itself
//!
//! Every message is marshalled to bytes when it enters the bus and decoded
//! again by the receiving side.
//!
//! # Example
//!
//! ```
//! use busrpc::bus::{Bus, LocalBus, NameFlags, RequestNameReply};
//!
//! let bus = LocalBus::new();
//! let conn = bus.connect().unwrap();
//! assert!(conn.unique_name().starts_with(":1."));
//!
//! let reply = conn.request_name("com.example.HelloService", NameFlags::server()).unwrap();
//! assert_eq!(reply, RequestNameReply::PrimaryOwner);
//! ```

mod daemon;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{
    BoxFuture, Bus, BusType, Inbound, NameFlags, PendingReply, RequestNameReply, DAEMON_NAME,
};
use crate::codec::MsgPackCodec;
use crate::error::{names as errors, BusrpcError, MethodError, Result};
use crate::message::names;
use crate::message::{Header, Message, MessageKind, MethodCall, MethodReply, Reply};

static SYSTEM_BUS: OnceLock<LocalBus> = OnceLock::new();
static SESSION_BUS: OnceLock<LocalBus> = OnceLock::new();

/// A connected peer.
struct Peer {
    /// Inbound queue (calls and signals).
    inbound: mpsc::UnboundedSender<Bytes>,
    /// Replies this peer is waiting for, by call serial.
    pending: HashMap<u32, oneshot::Sender<Bytes>>,
}

/// Ownership record of a well-known name.
struct NameEntry {
    owner: String,
    allow_replacement: bool,
    queue: VecDeque<(String, NameFlags)>,
}

/// A call waiting for its reply, by `(caller, caller serial)`.
type CallKey = (String, u32);

#[derive(Default)]
struct BrokerState {
    running: bool,
    next_peer: u64,
    peers: HashMap<String, Peer>,
    names: HashMap<String, NameEntry>,
    /// Callee of every call still waiting for its reply.
    outstanding: HashMap<CallKey, String>,
    messages_routed: u32,
}

struct Broker {
    id: String,
    state: Mutex<BrokerState>,
}

/// An in-process message bus.
///
/// Cloning yields another handle on the same bus.
#[derive(Clone)]
pub struct LocalBus {
    broker: Arc<Broker>,
}

impl LocalBus {
    /// Create a new, isolated bus.
    pub fn new() -> Self {
        Self {
            broker: Arc::new(Broker {
                id: generate_bus_id(),
                state: Mutex::new(BrokerState {
                    running: true,
                    ..BrokerState::default()
                }),
            }),
        }
    }

    /// The process-wide bus of the given type.
    pub fn shared(bus_type: BusType) -> LocalBus {
        let cell = match bus_type {
            BusType::System => &SYSTEM_BUS,
            BusType::Session => &SESSION_BUS,
        };
        cell.get_or_init(LocalBus::new).clone()
    }

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// [`BusrpcError::Connection`] once the bus has been shut down.
    pub fn connect(&self) -> Result<LocalConnection> {
        let (tx, rx) = mpsc::unbounded_channel();

        let unique = {
            let mut state = self.broker.state.lock();
            if !state.running {
                return Err(BusrpcError::Connection("bus is not running".to_string()));
            }
            state.next_peer += 1;
            let unique = format!(":1.{}", state.next_peer);
            state.peers.insert(
                unique.clone(),
                Peer {
                    inbound: tx,
                    pending: HashMap::new(),
                },
            );
            unique
        };

        Ok(LocalConnection {
            broker: self.broker.clone(),
            unique,
            next_serial: AtomicU32::new(1),
            inbound: Mutex::new(Some(rx)),
        })
    }

    /// Stop accepting new connections. Existing ones keep working.
    pub fn shutdown(&self) {
        self.broker.state.lock().running = false;
    }

    /// Bus identifier.
    pub fn id(&self) -> &str {
        &self.broker.id
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.broker.state.lock().peers.len()
    }

    /// Current owner of a well-known name.
    pub fn name_owner(&self, name: &str) -> Option<String> {
        self.broker
            .state
            .lock()
            .names
            .get(name)
            .map(|e| e.owner.clone())
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a bus id from the process id and the current time.
fn generate_bus_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    format!("{:016x}{:016x}", nanos.wrapping_mul(0x517cc1b727220a95) ^ pid, pid)
}

impl BrokerState {
    /// Resolve a destination to a connected unique name.
    fn resolve(&self, destination: &str) -> Option<String> {
        if names::is_unique_name(destination) {
            return self
                .peers
                .contains_key(destination)
                .then(|| destination.to_string());
        }
        self.names.get(destination).map(|e| e.owner.clone())
    }

    /// Hand an encoded reply to the peer waiting for it.
    fn deliver_reply(&mut self, caller: &str, serial: u32, bytes: Bytes) -> bool {
        let waiter = self
            .peers
            .get_mut(caller)
            .and_then(|peer| peer.pending.remove(&serial));
        match waiter {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }

    /// Answer a call on behalf of the bus with an error reply.
    fn reply_error(&mut self, caller: &str, serial: u32, error: MethodError) {
        let reply = daemon_reply(caller, serial, MethodReply::Error(error));
        match MsgPackCodec::encode_message(&Message::Reply(reply)) {
            Ok(bytes) => {
                self.deliver_reply(caller, serial, bytes);
            }
            Err(e) => tracing::error!("Cannot encode bus error reply: {}", e),
        }
    }

    /// Fail every call outstanding on `callee`.
    fn abandon_calls(&mut self, callee: &str) {
        let abandoned: Vec<CallKey> = self
            .outstanding
            .iter()
            .filter(|(_, c)| c.as_str() == callee)
            .map(|(key, _)| key.clone())
            .collect();

        for key in abandoned {
            self.outstanding.remove(&key);
            let (caller, serial) = key;
            tracing::debug!("{} went away without replying to {}#{}", callee, caller, serial);
            self.reply_error(
                &caller,
                serial,
                MethodError::new(
                    errors::NO_REPLY,
                    "Message recipient disconnected from message bus without replying",
                ),
            );
        }
    }

    /// Remove `owner` from a name, promoting the next queued requester.
    fn drop_ownership(&mut self, name: &str, owner: &str) -> bool {
        let Some(entry) = self.names.get_mut(name) else {
            return false;
        };

        if entry.owner != owner {
            let before = entry.queue.len();
            entry.queue.retain(|(q, _)| q != owner);
            return entry.queue.len() != before;
        }

        match entry.queue.pop_front() {
            Some((next, flags)) => {
                tracing::debug!("{} passes from {} to {}", name, owner, next);
                entry.owner = next;
                entry.allow_replacement = flags.allow_replacement;
            }
            None => {
                self.names.remove(name);
            }
        }
        true
    }
}

fn daemon_reply(caller: &str, serial: u32, body: MethodReply) -> Reply {
    Reply {
        header: Header {
            sender: Some(DAEMON_NAME.to_string()),
            destination: Some(caller.to_string()),
            reply_serial: Some(serial),
            no_reply_expected: true,
            ..Header::default()
        },
        body,
    }
}

impl Broker {
    fn request_name(&self, unique: &str, name: &str, flags: NameFlags) -> Result<RequestNameReply> {
        names::validate_bus_name(name).map_err(|e| BusrpcError::Name {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if names::is_unique_name(name) || name == DAEMON_NAME {
            return Err(BusrpcError::Name {
                name: name.to_string(),
                reason: "name is reserved".to_string(),
            });
        }

        let mut state = self.state.lock();
        let Some(entry) = state.names.get_mut(name) else {
            state.names.insert(
                name.to_string(),
                NameEntry {
                    owner: unique.to_string(),
                    allow_replacement: flags.allow_replacement,
                    queue: VecDeque::new(),
                },
            );
            return Ok(RequestNameReply::PrimaryOwner);
        };

        if entry.owner == unique {
            entry.allow_replacement = flags.allow_replacement;
            return Ok(RequestNameReply::AlreadyOwner);
        }

        if flags.replace_existing && entry.allow_replacement {
            tracing::debug!("{} replaces {} as owner of {}", unique, entry.owner, name);
            entry.queue.retain(|(q, _)| q != unique);
            entry.owner = unique.to_string();
            entry.allow_replacement = flags.allow_replacement;
            return Ok(RequestNameReply::PrimaryOwner);
        }

        if flags.do_not_queue {
            return Ok(RequestNameReply::Exists);
        }

        if !entry.queue.iter().any(|(q, _)| q == unique) {
            entry.queue.push_back((unique.to_string(), flags));
        }
        Ok(RequestNameReply::InQueue)
    }

    fn release_name(&self, unique: &str, name: &str) -> bool {
        self.state.lock().drop_ownership(name, unique)
    }

    /// Route one message from `sender`.
    fn route(&self, sender: &str, message: Message, waiter: Option<oneshot::Sender<Bytes>>) -> Result<()> {
        let serial = message.header().serial;
        let kind = message.kind();
        let destination = message.header().destination.clone();
        let reply_serial = message.header().reply_serial;

        if let Message::MethodCall(call) = &message {
            if call.destination() == Some(DAEMON_NAME) {
                let body = {
                    let state = self.state.lock();
                    daemon::handle(&self.id, &state, call)
                };
                let mut state = self.state.lock();
                state.messages_routed = state.messages_routed.wrapping_add(1);
                if let Some(tx) = waiter {
                    let bytes = MsgPackCodec::encode_message(&Message::Reply(daemon_reply(
                        sender, serial, body,
                    )))?;
                    let _ = tx.send(bytes);
                }
                return Ok(());
            }
        }

        let bytes = MsgPackCodec::encode_message(&message)?;
        drop(message);

        let mut state = self.state.lock();
        if !state.peers.contains_key(sender) {
            return Err(BusrpcError::Disconnected);
        }
        state.messages_routed = state.messages_routed.wrapping_add(1);

        match kind {
            MessageKind::MethodCall => {
                if let Some(tx) = waiter {
                    if let Some(peer) = state.peers.get_mut(sender) {
                        peer.pending.insert(serial, tx);
                    }
                }
                let expects_reply = state
                    .peers
                    .get(sender)
                    .map(|p| p.pending.contains_key(&serial))
                    .unwrap_or(false);

                let dest = destination.unwrap_or_default();
                let Some(callee) = state.resolve(&dest) else {
                    if expects_reply {
                        state.reply_error(
                            sender,
                            serial,
                            MethodError::new(
                                errors::SERVICE_UNKNOWN,
                                format!("The name {dest} was not provided by any service"),
                            ),
                        );
                    }
                    return Ok(());
                };

                let delivered = state
                    .peers
                    .get(&callee)
                    .map(|p| p.inbound.send(bytes).is_ok())
                    .unwrap_or(false);

                if !delivered {
                    tracing::warn!("{} no longer reads its inbound queue", callee);
                    if expects_reply {
                        state.reply_error(
                            sender,
                            serial,
                            MethodError::new(
                                errors::NO_REPLY,
                                "Message recipient is not reading messages",
                            ),
                        );
                    }
                } else if expects_reply {
                    state.outstanding.insert((sender.to_string(), serial), callee);
                }
            }

            MessageKind::MethodReturn | MessageKind::MethodError => {
                let (Some(caller), Some(reply_serial)) = (destination, reply_serial) else {
                    tracing::warn!("Dropping reply from {} without destination", sender);
                    return Ok(());
                };
                let key = (caller.clone(), reply_serial);
                if state.outstanding.get(&key).is_some_and(|callee| callee == sender) {
                    state.outstanding.remove(&key);
                }
                if !state.deliver_reply(&caller, reply_serial, bytes) {
                    tracing::warn!(
                        "Dropping reply from {} to {}#{}: nobody is waiting",
                        sender,
                        caller,
                        reply_serial
                    );
                }
            }

            MessageKind::Signal => match destination {
                Some(dest) => {
                    if let Some(peer) = state.resolve(&dest).and_then(|u| state.peers.get(&u)) {
                        let _ = peer.inbound.send(bytes);
                    }
                }
                None => {
                    for (unique, peer) in &state.peers {
                        if unique != sender {
                            let _ = peer.inbound.send(bytes.clone());
                        }
                    }
                }
            },
        }

        Ok(())
    }

    /// Forget a call whose caller stopped waiting. A late reply is dropped.
    fn forget_call(&self, caller: &str, serial: u32) {
        let mut state = self.state.lock();
        if let Some(peer) = state.peers.get_mut(caller) {
            peer.pending.remove(&serial);
        }
        state.outstanding.remove(&(caller.to_string(), serial));
    }

    fn disconnect(&self, unique: &str) {
        let mut state = self.state.lock();
        state.peers.remove(unique);
        state.outstanding.retain(|(caller, _), _| caller != unique);

        let owned: Vec<String> = state
            .names
            .iter()
            .filter(|(_, e)| e.owner == unique || e.queue.iter().any(|(q, _)| q == unique))
            .map(|(n, _)| n.clone())
            .collect();
        for name in owned {
            state.drop_ownership(&name, unique);
        }

        state.abandon_calls(unique);
        tracing::debug!("{} disconnected", unique);
    }
}

/// A connection to a [`LocalBus`].
///
/// Dropping it disconnects from the bus: owned names are released and
/// callers waiting on this connection get a `NoReply` error.
pub struct LocalConnection {
    broker: Arc<Broker>,
    unique: String,
    next_serial: AtomicU32,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl LocalConnection {
    fn allocate_serial(&self) -> u32 {
        loop {
            let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }

    fn stamp(&self, message: &mut Message) -> u32 {
        let serial = self.allocate_serial();
        let header = message.header_mut();
        header.serial = serial;
        header.sender = Some(self.unique.clone());
        serial
    }
}

impl Bus for LocalConnection {
    fn unique_name(&self) -> &str {
        &self.unique
    }

    fn request_name(&self, name: &str, flags: NameFlags) -> Result<RequestNameReply> {
        self.broker.request_name(&self.unique, name, flags)
    }

    fn release_name(&self, name: &str) -> Result<bool> {
        Ok(self.broker.release_name(&self.unique, name))
    }

    fn send_with_reply(&self, call: MethodCall) -> Result<PendingReply> {
        let mut message = Message::MethodCall(call);
        let serial = self.stamp(&mut message);
        message.header_mut().no_reply_expected = false;

        let (tx, rx) = oneshot::channel();
        self.broker.route(&self.unique, message, Some(tx))?;

        let broker: Weak<Broker> = Arc::downgrade(&self.broker);
        let caller = self.unique.clone();
        Ok(PendingReply::new(serial, rx).on_drop(move || {
            if let Some(broker) = broker.upgrade() {
                broker.forget_call(&caller, serial);
            }
        }))
    }

    fn send(&self, mut message: Message) -> Result<u32> {
        let serial = self.stamp(&mut message);
        if let Message::MethodCall(call) = &mut message {
            call.header.no_reply_expected = true;
        }
        self.broker.route(&self.unique, message, None)?;
        Ok(serial)
    }

    fn take_inbound(&self) -> Result<Box<dyn Inbound>> {
        let rx = self.inbound.lock().take().ok_or(BusrpcError::AlreadyClaimed)?;
        Ok(Box::new(LocalInbound {
            rx,
            queued: VecDeque::new(),
            broker: self.broker.clone(),
            unique: self.unique.clone(),
        }))
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.broker.disconnect(&self.unique);
    }
}

/// Inbound queue of a [`LocalConnection`].
struct LocalInbound {
    rx: mpsc::UnboundedReceiver<Bytes>,
    queued: VecDeque<Bytes>,
    broker: Arc<Broker>,
    unique: String,
}

impl Inbound for LocalInbound {
    fn readable(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if !self.queued.is_empty() {
                return true;
            }
            match self.rx.recv().await {
                Some(bytes) => {
                    self.queued.push_back(bytes);
                    true
                }
                None => false,
            }
        })
    }

    fn pop(&mut self) -> Option<Message> {
        let bytes = match self.queued.pop_front() {
            Some(b) => b,
            None => self.rx.try_recv().ok()?,
        };

        match MsgPackCodec::decode_message(&bytes) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Dropping undecodable message for {}: {}", self.unique, e);
                None
            }
        }
    }
}

impl Drop for LocalInbound {
    fn drop(&mut self) {
        // Nobody will pop what is still queued; fail those calls now.
        self.rx.close();
        self.broker.state.lock().abandon_calls(&self.unique);
    }
}
