//! Request-time faults.
//!
//! A handler that cannot produce a response returns `Err(Fault)`. The fault
//! travels outward through the middleware chain until some layer turns it into
//! a response: the exception layer for registered status codes and kinds, the
//! server-error layer for everything else.
//!
//! Any `std::error::Error + Send + Sync + 'static` converts into a [`Fault`],
//! so `?` works inside handlers:
//!
//! ```rust
//! use strata::{Fault, Request, Response};
//!
//! async fn read_config(_req: Request) -> Result<Response, Fault> {
//!     let raw = std::fs::read_to_string("/etc/app.toml")?;
//!     Ok(Response::text(raw))
//! }
//! ```

use std::any::{Any, TypeId};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::hash::{Hash, Hasher};

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

// ── FaultKind ─────────────────────────────────────────────────────────────────

/// Identifies the concrete error type a [`Fault`] was built from.
///
/// Two kinds are equal when they name the same Rust type. The type name is
/// kept only for logs and diagnostic pages.
#[derive(Clone, Copy)]
pub struct FaultKind {
    id: TypeId,
    name: &'static str,
}

/// Never constructed; its `TypeId` is the catch-all kind.
enum AnyFault {}

impl FaultKind {
    pub fn of<E: 'static>() -> Self {
        Self { id: TypeId::of::<E>(), name: std::any::type_name::<E>() }
    }

    /// The catch-all kind. A handler registered under it handles every fault
    /// that nothing else claimed.
    pub fn any() -> Self {
        Self::of::<AnyFault>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for FaultKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FaultKind {}

impl Hash for FaultKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FaultKind").field(&self.name).finish()
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ── Built-in fault types ──────────────────────────────────────────────────────

/// An error that already knows its HTTP status.
///
/// The router raises these for unmatched paths (404) and methods (405). The
/// exception layer looks them up by status code first, then by kind, and
/// finally renders them as a plain-text response with that status.
#[derive(Debug, thiserror::Error)]
#[error("{status}: {detail}")]
pub struct HttpFault {
    status: StatusCode,
    detail: Cow<'static, str>,
}

impl HttpFault {
    pub fn new(status: StatusCode) -> Self {
        let detail = status.canonical_reason().unwrap_or_default();
        Self { status, detail: Cow::Borrowed(detail) }
    }

    pub fn with_detail(status: StatusCode, detail: impl Into<Cow<'static, str>>) -> Self {
        Self { status, detail: detail.into() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// A panic caught while a handler future was being polled.
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {message}")]
pub struct Panic {
    message: String,
}

impl Panic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(s) => *s,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(s) => (*s).to_owned(),
                Err(_) => "Box<dyn Any>".to_owned(),
            },
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ── Fault ─────────────────────────────────────────────────────────────────────

/// Any error raised while handling a request.
///
/// `Fault` itself does not implement [`std::error::Error`], so it cannot be
/// wrapped in another `Fault`.
pub struct Fault {
    kind: FaultKind,
    error: Box<dyn StdError + Send + Sync + 'static>,
    headers: HeaderMap,
    backtrace: Backtrace,
}

impl Fault {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind: FaultKind::of::<E>(),
            error: Box::new(error),
            headers: HeaderMap::new(),
            // A no-op unless RUST_BACKTRACE / RUST_LIB_BACKTRACE is set.
            backtrace: Backtrace::capture(),
        }
    }

    /// An [`HttpFault`] with the canonical reason phrase as its detail.
    pub fn http(status: StatusCode) -> Self {
        Self::new(HttpFault::new(status))
    }

    pub fn http_with_detail(status: StatusCode, detail: impl Into<Cow<'static, str>>) -> Self {
        Self::new(HttpFault::with_detail(status, detail))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(Panic::from_payload(payload))
    }

    /// Attaches a header to whatever response this fault is eventually
    /// rendered into by the default HTTP renderer (e.g. `Allow` on a 405).
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The HTTP status, if this fault was built from an [`HttpFault`].
    pub fn status(&self) -> Option<StatusCode> {
        self.downcast_ref::<HttpFault>().map(HttpFault::status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.backtrace),
            _ => None,
        }
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// The wrapped error followed by its `source()` chain.
    pub fn chain(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        let root: &(dyn StdError + 'static) = &*self.error;
        std::iter::successors(Some(root), |&e| e.source())
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.error
    }
}

impl<E> From<E> for Fault
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("kind", &self.kind)
            .field("error", &self.error)
            .finish()
    }
}
