//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: structured tracing, request-id injection,
//! authentication-header inspection.
//!
//! A [`Layer`] wraps an inner [`Endpoint`](crate::Endpoint) and returns a new
//! one. A [`Middleware`] pairs a layer with a name and an `enabled` flag; the
//! application keeps an ordered list of them and folds it into a single
//! endpoint (see [`StackBuilder`](crate::StackBuilder)).
//!
//! The quickest way to write one is [`from_fn`]:
//!
//! ```rust
//! use strata::middleware::{self, Middleware, Next};
//! use strata::{Fault, Request, Response};
//!
//! async fn stamp(req: Request, next: Next) -> Result<Response, Fault> {
//!     let mut res = next.run(req).await?;
//!     res.headers_mut().insert("x-served-by", "strata".parse().unwrap());
//!     Ok(res)
//! }
//!
//! let stamp = Middleware::new(middleware::from_fn("stamp", stamp));
//! ```
//!
//! Built-in layers:
//! - [`ServerErrors`]: outermost, turns every escaping fault into a response
//! - [`Exceptions`]: innermost, dispatches faults to registered handlers
//! - [`Trace`]: a per-request span with status and latency

mod exceptions;
mod func;
mod server_errors;
mod trace;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;
use crate::handler::{BoxEndpoint, BoxFuture};
use crate::request::Request;

pub use exceptions::{ExceptionHandlers, Exceptions, HandlerKey};
pub use func::{FromFn, from_fn};
pub use server_errors::ServerErrors;
pub(crate) use server_errors::generic_response;
pub use trace::Trace;

/// A wrapper factory: given the rest of the chain, produce an endpoint that
/// runs in front of it.
///
/// A layer's configuration is its own fields. `wrap` may be called more than
/// once (the stack is rebuilt from scratch after every configuration change),
/// so it must not consume anything.
pub trait Layer: Send + Sync + 'static {
    /// Used in logs and to look up per-middleware configuration.
    fn name(&self) -> &str;

    fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint;
}

/// A registered middleware: a [`Layer`] plus whether it takes part in the
/// chain.
///
/// Immutable once created; [`with_enabled`](Self::with_enabled) returns a
/// new value. A disabled middleware is skipped when the stack is assembled
/// and its neighbours keep their relative order.
#[derive(Clone)]
pub struct Middleware {
    layer: Arc<dyn Layer>,
    enabled: bool,
}

impl Middleware {
    pub fn new(layer: impl Layer) -> Self {
        Self { layer: Arc::new(layer), enabled: true }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn name(&self) -> &str {
        self.layer.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint {
        self.layer.wrap(inner)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// The rest of the chain, as seen from inside a [`from_fn`] middleware.
#[derive(Clone)]
pub struct Next {
    inner: BoxEndpoint,
}

impl Next {
    pub(crate) fn new(inner: BoxEndpoint) -> Self {
        Self { inner }
    }

    /// Passes the request on to the next layer (or the router).
    pub fn run(self, req: Request) -> BoxFuture {
        self.inner.call(req)
    }
}

/// The kinds of function middleware an application accepts.
///
/// Only `"http"` exists. Parsing anything else fails, so a misspelled kind is
/// caught at setup time rather than silently ignored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MiddlewareKind {
    Http,
}

impl FromStr for MiddlewareKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            other => Err(Error::UnsupportedMiddlewareKind(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http", true)]
    #[case("HTTP", false)]
    #[case("websocket", false)]
    #[case("", false)]
    fn only_http_kind_parses(#[case] kind: &str, #[case] ok: bool) {
        assert_eq!(kind.parse::<MiddlewareKind>().is_ok(), ok);
    }

    #[test]
    fn with_enabled_keeps_the_layer() {
        let m = Middleware::new(Trace::new());
        assert!(m.is_enabled());
        let m = m.with_enabled(false);
        assert!(!m.is_enabled());
        assert_eq!(m.name(), "trace");
    }
}
