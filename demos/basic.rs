//! Minimal strata example: CRUD-style JSON endpoints, a request-id
//! middleware, exception handlers and lifecycle hooks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -X POST http://localhost:3000/users
//!   curl -X DELETE http://localhost:3000/users/42
//!   curl -X PUT http://localhost:3000/users/42      # 405
//!   curl http://localhost:3000/nope                 # custom 404
//!   curl http://localhost:3000/admin/stats
//!
//! Configuration is read from `strata.toml` if present and from `STRATA__*`
//! environment variables, e.g. `STRATA__DEBUG=true`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use http::{Method, StatusCode};
use strata::middleware::{self, Next, Trace};
use strata::{
    AppConfig, Application, Fault, HttpFault, Middleware, Request, Response, Router, Server,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
#[error("user {0} is locked")]
struct Locked(String);

#[tokio::main]
async fn main() -> Result<(), strata::Error> {
    tracing_subscriber::fmt::init();

    let path = Path::new("strata.toml");
    let config = AppConfig::load(path.exists().then_some(path))?;

    let admin = Router::new().get("/stats", stats);

    let mut app = Application::builder()
        .config(config.clone())
        .middleware(Middleware::new(Trace::new()))
        .exception_handler(StatusCode::NOT_FOUND, not_found)
        .exception_handler(strata::HandlerKey::kind::<Locked>(), locked)
        .on_startup(|| async { tracing::info!("warming caches") })
        .on_shutdown(|| async { tracing::info!("flushing buffers") })
        .build();

    app.add_route("/users/{id}", get_user)?;
    app.add_route_with(&[Method::POST], "/users", create_user)?;
    app.add_route_with(&[Method::DELETE], "/users/{id}", delete_user)?;
    app.mount("/admin", admin)?;
    app.add_middleware(Middleware::new(middleware::from_fn("request-id", request_id)));

    Server::from_config(&config)?.serve(app).await
}

// Outermost user middleware: stamps every response with an id.
async fn request_id(req: Request, next: Next) -> Result<Response, Fault> {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let mut res = next.run(req).await?;
    if let Ok(value) = id.to_string().parse() {
        res.headers_mut().insert("x-request-id", value);
    }
    Ok(res)
}

// GET /users/{id}
async fn get_user(req: Request) -> Result<Response, Fault> {
    let id = req.param("id").unwrap_or("unknown");
    if id == "13" {
        return Err(Locked(id.to_owned()).into());
    }
    Ok(Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#)))
}

// POST /users
//
// req.body() is &[u8]: parse with serde_json::from_slice, simd-json, etc.
async fn create_user(req: Request) -> Result<Response, Fault> {
    if req.body().is_empty() {
        return Err(HttpFault::with_detail(StatusCode::BAD_REQUEST, "body required").into());
    }

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#))
}

// DELETE /users/{id} → 204 No Content
async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}

// GET /admin/stats
async fn stats(req: Request) -> String {
    format!("mounted at {}, next id {}", req.root_path(), NEXT_ID.load(Ordering::Relaxed))
}

async fn not_found(req: Request, _fault: Fault) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("nothing at {}\n", req.path()))
}

async fn locked(_req: Request, fault: Fault) -> (StatusCode, String) {
    (StatusCode::LOCKED, format!("{fault}\n"))
}
