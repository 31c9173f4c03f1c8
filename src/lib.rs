//! # strata
//!
//! An application layer for small async HTTP services: a middleware stack, a
//! radix-tree router, typed exception handlers and lifecycle hooks behind one
//! callable [`Application`].
//!
//! ## The stack
//!
//! Every request passes through the same layers:
//!
//! ```text
//! ServerErrors → your middleware (first added outermost) → Exceptions → Router
//! ```
//!
//! - **ServerErrors** turns any fault that escapes the chain, panics
//!   included, into a response: a diagnostic page in debug mode, your
//!   catch-all handler otherwise, or a plain 500.
//! - **Exceptions** hands faults to the handler registered for their status
//!   code or error type. Unhandled 404s and 405s from the router are rendered
//!   here too.
//!
//! The stack is rebuilt whenever the application's configuration changes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::{Method, StatusCode};
//! use strata::{Application, Fault, HttpFault, Request, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata::Error> {
//!     let mut app = Application::new();
//!     app.add_route("/users/{id}", get_user)?;
//!     app.add_route_with(&[Method::POST], "/users", create_user)?;
//!     app.add_exception_handler(StatusCode::NOT_FOUND, not_found);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(req: Request) -> Result<Response, Fault> {
//!     if req.body().is_empty() {
//!         return Err(HttpFault::with_detail(StatusCode::BAD_REQUEST, "empty body").into());
//!     }
//!     Ok(Response::builder()
//!         .status(StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .json(r#"{"id":"99"}"#))
//! }
//!
//! async fn not_found(req: Request, _fault: Fault) -> (StatusCode, String) {
//!     (StatusCode::NOT_FOUND, format!("nothing at {}", req.path()))
//! }
//! ```

mod app;
mod capabilities;
mod config;
mod error;
mod fault;
mod handler;
mod lifespan;
mod request;
mod response;
mod router;
mod server;
mod stack;
mod state;

pub mod middleware;

pub use app::{Application, ApplicationBuilder};
pub use capabilities::Capabilities;
pub use crate::config::{AppConfig, MiddlewareConfig, ServerConfig};
pub use error::Error;
pub use fault::{Fault, FaultKind, HttpFault, Panic};
pub use handler::{BoxEndpoint, BoxFuture, Endpoint, ErrorHandler, Handler, Outcome};
pub use lifespan::{IntoHookOutcome, LifecycleEvent, LifecycleHook, Lifespan};
pub use middleware::{HandlerKey, Middleware};
pub use request::Request;
pub use response::{ContentType, IntoOutcome, IntoResponse, Response, ResponseBuilder};
pub use router::{MountTarget, Router};
pub use server::Server;
pub use stack::StackBuilder;
pub use state::State;
