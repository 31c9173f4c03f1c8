//! Typed exception handling: the innermost layer of every stack.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use crate::fault::{Fault, FaultKind};
use crate::handler::{BoxEndpoint, BoxErrorHandler, BoxFuture, Endpoint, ErrorHandler};
use crate::middleware::Layer;
use crate::request::Request;
use crate::response::Response;

// ── HandlerKey ────────────────────────────────────────────────────────────────

/// What an exception handler is registered under.
///
/// `Status(500)` and `Kind(FaultKind::any())` are the catch-all keys: a
/// handler registered under either becomes the top-level error handler of
/// [`ServerErrors`](crate::middleware::ServerErrors) instead of a typed one.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandlerKey {
    /// Matches [`HttpFault`](crate::fault::HttpFault)s with this status.
    Status(StatusCode),
    /// Matches faults built from this error type.
    Kind(FaultKind),
}

impl HandlerKey {
    pub const SERVER_ERROR: Self = Self::Status(StatusCode::INTERNAL_SERVER_ERROR);

    pub fn kind<E: 'static>() -> Self {
        Self::Kind(FaultKind::of::<E>())
    }

    pub fn any() -> Self {
        Self::Kind(FaultKind::any())
    }

    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Status(code) => *code == StatusCode::INTERNAL_SERVER_ERROR,
            Self::Kind(kind) => *kind == FaultKind::any(),
        }
    }
}

impl From<StatusCode> for HandlerKey {
    fn from(code: StatusCode) -> Self {
        Self::Status(code)
    }
}

impl From<FaultKind> for HandlerKey {
    fn from(kind: FaultKind) -> Self {
        Self::Kind(kind)
    }
}

// ── ExceptionHandlers ─────────────────────────────────────────────────────────

/// Exception handlers in registration order.
///
/// Registering a key a second time replaces the handler but keeps the key's
/// original position.
#[derive(Clone, Default)]
pub struct ExceptionHandlers {
    entries: Vec<(HandlerKey, BoxErrorHandler)>,
}

impl ExceptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<HandlerKey>, handler: impl ErrorHandler) {
        self.insert_boxed(key.into(), handler.into_boxed_error_handler());
    }

    pub(crate) fn insert_boxed(&mut self, key: HandlerKey, handler: BoxErrorHandler) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((key, handler)),
        }
    }

    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &HandlerKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, key: &HandlerKey) -> Option<&BoxErrorHandler> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, h)| h)
    }

    /// Splits off the catch-all handler. When several catch-all keys are
    /// registered, the last one registered wins.
    pub(crate) fn partition(&self) -> (Option<BoxErrorHandler>, ExceptionHandlers) {
        let mut error_handler = None;
        let mut typed = ExceptionHandlers::new();
        for (key, handler) in &self.entries {
            if key.is_server_error() {
                error_handler = Some(Arc::clone(handler));
            } else {
                typed.entries.push((*key, Arc::clone(handler)));
            }
        }
        (error_handler, typed)
    }
}

impl fmt::Debug for ExceptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// ── Exceptions layer ──────────────────────────────────────────────────────────

/// Dispatches faults to the handler registered for them.
///
/// Lookup order: the fault's status (HTTP faults only), then its kind. HTTP
/// faults nobody claimed are rendered as plain text with their own status.
/// Every other unclaimed fault propagates outward unchanged.
pub struct Exceptions {
    handlers: Arc<ExceptionHandlers>,
    debug: bool,
}

impl Exceptions {
    pub fn new(handlers: ExceptionHandlers, debug: bool) -> Self {
        Self { handlers: Arc::new(handlers), debug }
    }
}

impl Layer for Exceptions {
    fn name(&self) -> &str {
        "exceptions"
    }

    fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint {
        Arc::new(ExceptionsEndpoint {
            inner,
            handlers: Arc::clone(&self.handlers),
            debug: self.debug,
        })
    }
}

struct ExceptionsEndpoint {
    inner: BoxEndpoint,
    handlers: Arc<ExceptionHandlers>,
    debug: bool,
}

impl Endpoint for ExceptionsEndpoint {
    fn call(&self, req: Request) -> BoxFuture {
        let head = req.head();
        let fut = self.inner.call(req);
        let handlers = Arc::clone(&self.handlers);
        let debug = self.debug;

        Box::pin(async move {
            let fault = match fut.await {
                Ok(res) => return Ok(res),
                Err(fault) => fault,
            };

            let status = fault.status();
            let handler = status
                .and_then(|code| handlers.get(&HandlerKey::Status(code)))
                .or_else(|| handlers.get(&HandlerKey::Kind(fault.kind())));

            match handler {
                Some(handler) => {
                    if debug {
                        debug!(kind = %fault.kind(), path = head.path(), fault = ?fault, "dispatching fault to handler");
                    } else {
                        debug!(kind = %fault.kind(), path = head.path(), "dispatching fault to handler");
                    }
                    // A fault raised here goes on to ServerErrors.
                    handler.call(head, fault).await
                }
                None => match status {
                    Some(code) => Ok(http_fault_response(code, &fault)),
                    None => Err(fault),
                },
            }
        })
    }
}

/// Default rendering for an unclaimed [`HttpFault`](crate::fault::HttpFault).
fn http_fault_response(code: StatusCode, fault: &Fault) -> Response {
    let builder = Response::builder().status(code).headers(fault.headers());
    if code == StatusCode::NO_CONTENT || code == StatusCode::NOT_MODIFIED {
        return builder.no_body();
    }
    let detail = fault
        .downcast_ref::<crate::fault::HttpFault>()
        .map(|h| h.detail().to_owned())
        .unwrap_or_default();
    builder.text(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handler;
    use crate::fault::HttpFault;

    #[derive(Debug, thiserror::Error)]
    #[error("account locked")]
    struct Locked;

    #[derive(Debug, thiserror::Error)]
    #[error("database down")]
    struct DbDown;

    fn get(path: &str) -> Request {
        Request::from(http::Request::get(path).body("").unwrap())
    }

    async fn locked(_req: Request) -> Result<Response, Fault> {
        Err(Locked.into())
    }

    async fn db_down(_req: Request) -> Result<Response, Fault> {
        Err(DbDown.into())
    }

    async fn missing(_req: Request) -> Result<Response, Fault> {
        Err(Fault::http(StatusCode::NOT_FOUND))
    }

    async fn not_modified(_req: Request) -> Result<Response, Fault> {
        Err(Fault::http(StatusCode::NOT_MODIFIED))
    }

    async fn locked_handler(_req: Request, _fault: Fault) -> Response {
        Response::builder().status(StatusCode::LOCKED).text("locked")
    }

    fn stack(handlers: ExceptionHandlers, endpoint: BoxEndpoint) -> BoxEndpoint {
        Exceptions::new(handlers, false).wrap(endpoint)
    }

    #[test]
    fn reinserting_a_key_keeps_its_position() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(StatusCode::NOT_FOUND, locked_handler);
        handlers.insert(HandlerKey::kind::<Locked>(), locked_handler);
        handlers.insert(StatusCode::NOT_FOUND, locked_handler);
        let keys: Vec<_> = handlers.keys().copied().collect();
        assert_eq!(keys, [HandlerKey::Status(StatusCode::NOT_FOUND), HandlerKey::kind::<Locked>()]);
    }

    #[test]
    fn partition_extracts_catch_all_keys() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::SERVER_ERROR, locked_handler);
        handlers.insert(StatusCode::NOT_FOUND, locked_handler);
        handlers.insert(HandlerKey::any(), locked_handler);

        let (error_handler, typed) = handlers.partition();
        assert!(error_handler.is_some());
        assert_eq!(typed.len(), 1);
        assert!(typed.contains(&HandlerKey::Status(StatusCode::NOT_FOUND)));
        assert!(!typed.contains(&HandlerKey::SERVER_ERROR));
    }

    #[tokio::test]
    async fn kind_handler_runs() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::kind::<Locked>(), locked_handler);
        let res = stack(handlers, locked.into_endpoint()).call(get("/")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn unmatched_fault_propagates() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::kind::<Locked>(), locked_handler);
        let fault = stack(handlers, db_down.into_endpoint()).call(get("/")).await.unwrap_err();
        assert!(fault.is::<DbDown>());
    }

    #[tokio::test]
    async fn status_handler_wins_over_kind_handler() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::kind::<HttpFault>(), |_req: Request, _f: Fault| async {
            "by kind"
        });
        handlers.insert(StatusCode::NOT_FOUND, |req: Request, _f: Fault| async move {
            format!("no {}", req.path())
        });
        let res = stack(handlers, missing.into_endpoint()).call(get("/gone")).await.unwrap();
        assert_eq!(res.text_body(), "no /gone");
    }

    #[tokio::test]
    async fn unclaimed_http_fault_renders_its_status() {
        let res = stack(ExceptionHandlers::new(), missing.into_endpoint())
            .call(get("/"))
            .await
            .unwrap();
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.text_body(), "Not Found");

        let res = stack(ExceptionHandlers::new(), not_modified.into_endpoint())
            .call(get("/"))
            .await
            .unwrap();
        assert_eq!(res.status_code(), StatusCode::NOT_MODIFIED);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn failing_handler_propagates_its_own_fault() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::kind::<Locked>(), |_req: Request, _f: Fault| async {
            Err::<Response, _>(DbDown)
        });
        let fault = stack(handlers, locked.into_endpoint()).call(get("/")).await.unwrap_err();
        assert!(fault.is::<DbDown>());
    }
}
