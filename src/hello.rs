//! The `com.example.HelloService` demo service.

use crate::handler::{HandlerResult, Router};

/// Well-known name of the service.
pub const SERVICE: &str = "com.example.HelloService";

/// Object path the service answers on.
pub const PATH: &str = "/com/example/HelloService";

/// Interface carrying `Hello`.
pub const INTERFACE: &str = "com.example.HelloInterface";

/// Method name.
pub const METHOD: &str = "Hello";

/// `Hello(name: s) -> s`.
pub fn hello(name: String) -> HandlerResult<String> {
    Ok(format!("Hello {name}!\n"))
}

/// Add the service's routes to `router`.
pub fn register(router: &mut Router) {
    router.register(INTERFACE, METHOD, hello);
}
