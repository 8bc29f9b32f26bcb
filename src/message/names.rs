//! Validation of bus names, object paths, interfaces and members.
//!
//! Rules follow the usual bus naming conventions, simplified:
//!
//! - object path: `/` or `/elem(/elem)*`, elements `[A-Za-z0-9_]+`
//! - interface: two or more dot-separated elements, each `[A-Za-z_][A-Za-z0-9_]*`
//! - member: one element `[A-Za-z_][A-Za-z0-9_]*`
//! - bus name: unique (`:1.42`) or well-known (`com.example.Service`, `-` allowed)
//!
//! Every name is limited to 255 bytes.

use crate::error::{BusrpcError, Result};

/// Maximum length of any name.
pub const MAX_NAME_LENGTH: usize = 255;

fn is_element(s: &str, allow_dash: bool, allow_leading_digit: bool) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        None => return false,
        Some(c) if c.is_ascii_digit() && !allow_leading_digit => return false,
        Some(_) => {}
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-'))
}

fn check_len(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BusrpcError::Compose(format!("{kind} must not be empty")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(BusrpcError::Compose(format!(
            "{kind} exceeds {MAX_NAME_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Validate an object path.
pub fn validate_object_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    let valid = path
        .strip_prefix('/')
        .map(|rest| rest.split('/').all(|e| is_element(e, false, true)))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(BusrpcError::Compose(format!("invalid object path: {path:?}")))
    }
}

/// Validate an interface name.
pub fn validate_interface(interface: &str) -> Result<()> {
    check_len("interface", interface)?;
    let elements: Vec<&str> = interface.split('.').collect();
    if elements.len() >= 2 && elements.iter().all(|e| is_element(e, false, false)) {
        Ok(())
    } else {
        Err(BusrpcError::Compose(format!("invalid interface: {interface:?}")))
    }
}

/// Validate a member (method or signal) name.
pub fn validate_member(member: &str) -> Result<()> {
    check_len("member", member)?;
    if is_element(member, false, false) {
        Ok(())
    } else {
        Err(BusrpcError::Compose(format!("invalid member: {member:?}")))
    }
}

/// Validate a bus name, unique or well-known.
pub fn validate_bus_name(name: &str) -> Result<()> {
    check_len("bus name", name)?;
    let valid = match name.strip_prefix(':') {
        Some(unique) => {
            let elements: Vec<&str> = unique.split('.').collect();
            elements.len() >= 2 && elements.iter().all(|e| is_element(e, true, true))
        }
        None => {
            let elements: Vec<&str> = name.split('.').collect();
            elements.len() >= 2 && elements.iter().all(|e| is_element(e, true, false))
        }
    };
    if valid {
        Ok(())
    } else {
        Err(BusrpcError::Compose(format!("invalid bus name: {name:?}")))
    }
}

/// Check whether a bus name is a unique connection name.
#[inline]
pub fn is_unique_name(name: &str) -> bool {
    name.starts_with(':')
}
