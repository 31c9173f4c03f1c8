//! Handler traits and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in a single
//! `HashMap<Method, Tree>`, and the middleware stack nests layers of different
//! types inside each other. Both are only possible behind a trait object, so
//! every handler, layer and router ends up as a [`BoxEndpoint`]:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.on(Method::GET, "/", hello)
//! hello.into_endpoint()                            ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← heap-allocated wrapper
//!        ↓  stored as BoxEndpoint = Arc<dyn Endpoint>
//! endpoint.call(req)  at request time              ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(req).await.into_outcome() })  ← BoxFuture
//! ```
//!
//! Per layer and request that costs one virtual call and one boxed future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::fault::Fault;
use crate::request::Request;
use crate::response::{IntoOutcome, Response};

// ── Core types ────────────────────────────────────────────────────────────────

/// What every endpoint resolves to: a response, or a fault for an outer layer
/// to deal with.
pub type Outcome = Result<Response, Fault>;

/// A heap-allocated, type-erased future that resolves to an [`Outcome`].
///
/// `Send + 'static` let tokio move the future across threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = Outcome> + Send + 'static>>;

/// Anything that can turn a [`Request`] into an [`Outcome`].
///
/// Implemented by wrapped handlers, by every middleware layer, by
/// [`Router`](crate::Router) and by [`Application`](crate::Application).
/// Implement it yourself when writing a [`Layer`](crate::middleware::Layer)
/// by hand.
pub trait Endpoint: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased endpoint shared across concurrent requests.
pub type BoxEndpoint = Arc<dyn Endpoint>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoOutcome
/// ```
///
/// where the return type is a response-like value or a
/// `Result<impl IntoResponse, impl Into<Fault>>`.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> BoxEndpoint;
}

/// Implemented for every valid exception handler:
///
/// ```text
/// async fn name(req: Request, fault: Fault) -> impl IntoOutcome
/// ```
///
/// The request passed in is a copy of the one that faulted, without its body.
pub trait ErrorHandler: private::SealedError + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_error_handler(self) -> BoxErrorHandler;
}

#[doc(hidden)]
pub trait ErasedErrorHandler: Send + Sync + 'static {
    fn call(&self, req: Request, fault: Fault) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxErrorHandler = Arc<dyn ErasedErrorHandler>;

/// The sealing traits are private, so external crates cannot implement the
/// handler traits on their own types. Each trait gets its own seal so the two
/// blanket impls below never overlap.
mod private {
    pub trait Sealed {}
    pub trait SealedError {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_endpoint(self) -> BoxEndpoint {
        Arc::new(FnHandler(self))
    }
}

impl<F, Fut, R> private::SealedError for F
where
    F: Fn(Request, Fault) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> ErrorHandler for F
where
    F: Fn(Request, Fault) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_error_handler(self) -> BoxErrorHandler {
        Arc::new(ErrorFn(self))
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`Endpoint`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> Endpoint for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

struct ErrorFn<F>(F);

impl<F, Fut, R> ErasedErrorHandler for ErrorFn<F>
where
    F: Fn(Request, Fault) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request, fault: Fault) -> BoxFuture {
        let fut = (self.0)(req, fault);
        Box::pin(async move { fut.await.into_outcome() })
    }
}
