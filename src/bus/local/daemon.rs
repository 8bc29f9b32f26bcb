//! Methods the local bus answers itself, on `org.freedesktop.DBus`.

use std::collections::HashMap;

use super::BrokerState;
use crate::error::{names as errors, MethodError};
use crate::message::{Args, MethodCall, MethodReply};

pub(super) const INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
pub(super) const STATS: &str = "org.freedesktop.DBus.Debug.Stats";
pub(super) const PEER: &str = "org.freedesktop.DBus.Peer";
pub(super) const DBUS: &str = "org.freedesktop.DBus";

const INTROSPECTION: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
<node>
  <interface name="org.freedesktop.DBus">
    <method name="GetNameOwner">
      <arg direction="in" type="s"/>
      <arg direction="out" type="s"/>
    </method>
    <method name="GetId">
      <arg direction="out" type="s"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg direction="out" type="s"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Peer">
    <method name="Ping"/>
  </interface>
  <interface name="org.freedesktop.DBus.Debug.Stats">
    <method name="GetStats">
      <arg direction="out" type="a{su}"/>
    </method>
  </interface>
</node>
"#;

/// Answer a call addressed to the bus itself.
pub(super) fn handle(bus_id: &str, state: &BrokerState, call: &MethodCall) -> MethodReply {
    let mut out = Args::new();

    match (call.interface.as_str(), call.member.as_str()) {
        (INTROSPECTABLE, "Introspect") => {
            out.push(INTROSPECTION);
        }
        (STATS, "GetStats") => {
            out.push(stats(state));
        }
        (PEER, "Ping") => {}
        (DBUS, "GetId") => {
            out.push(bus_id);
        }
        (DBUS, "GetNameOwner") => {
            let mut reader = call.args.reader();
            let name = match reader.read_str() {
                Ok(name) => name,
                Err(e) => return MethodReply::Error(MethodError::invalid_args(e.to_string())),
            };
            if let Err(e) = reader.finish() {
                return MethodReply::Error(MethodError::invalid_args(e.to_string()));
            }
            match state.resolve(name) {
                Some(owner) => {
                    out.push(owner);
                }
                None => {
                    return MethodReply::Error(MethodError::new(
                        errors::NAME_HAS_NO_OWNER,
                        format!("Could not get owner of name '{name}': no such name"),
                    ))
                }
            }
        }
        _ => {
            tracing::debug!(
                "Bus has no method {}.{} on {}",
                call.interface,
                call.member,
                call.path
            );
            return MethodReply::Error(MethodError::unknown_method());
        }
    }

    MethodReply::Return(out)
}

fn stats(state: &BrokerState) -> HashMap<String, u32> {
    let pending: usize = state.peers.values().map(|p| p.pending.len()).sum();
    let mut stats = HashMap::new();
    stats.insert("Serial".to_string(), state.messages_routed);
    stats.insert("ActiveConnections".to_string(), state.peers.len() as u32);
    stats.insert("BusNames".to_string(), state.names.len() as u32);
    stats.insert("PendingReplies".to_string(), pending as u32);
    stats.insert("OutstandingCalls".to_string(), state.outstanding.len() as u32);
    stats
}
