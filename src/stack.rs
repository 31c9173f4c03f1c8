//! Middleware stack assembly.
//!
//! ```text
//! [ServerErrors] + user middleware (registration order) + [Exceptions]
//!        ↓ fold right to left, starting from the router
//! ServerErrors(m1(m2(m3(Exceptions(router)))))
//! ```
//!
//! The first element of the list ends up outermost, so a request passes
//! `ServerErrors → m1 → m2 → m3 → Exceptions → router` on the way in and the
//! response travels back the other way.

use std::iter;

use tracing::debug;

use crate::handler::BoxEndpoint;
use crate::middleware::{ExceptionHandlers, Exceptions, Middleware, ServerErrors};

/// Composes the configured layers around an innermost endpoint.
///
/// Pure: it only arranges endpoints. It is re-run from scratch whenever the
/// application's configuration changes; nothing is patched incrementally.
pub struct StackBuilder<'a> {
    debug: bool,
    exception_handlers: &'a ExceptionHandlers,
    middleware: &'a [Middleware],
}

impl<'a> StackBuilder<'a> {
    pub fn new(
        debug: bool,
        exception_handlers: &'a ExceptionHandlers,
        middleware: &'a [Middleware],
    ) -> Self {
        Self { debug, exception_handlers, middleware }
    }

    pub fn build(self, router: BoxEndpoint) -> BoxEndpoint {
        let (error_handler, typed_handlers) = self.exception_handlers.partition();

        let server_errors = Middleware::new(ServerErrors::new(error_handler, self.debug));
        let exceptions = Middleware::new(Exceptions::new(typed_handlers, self.debug));

        let chain = iter::once(&server_errors)
            .chain(self.middleware)
            .chain(iter::once(&exceptions));

        let mut layers = 0;
        let stack = chain.rev().filter(|m| m.is_enabled()).fold(router, |app, m| {
            layers += 1;
            m.wrap(app)
        });

        debug!(
            layers,
            user_middleware = self.middleware.len(),
            debug = self.debug,
            "middleware stack built"
        );
        stack
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use http::StatusCode;

    use super::*;
    use crate::Handler;
    use crate::fault::Fault;
    use crate::handler::{BoxFuture, Endpoint};
    use crate::middleware::{HandlerKey, Layer};
    use crate::request::Request;
    use crate::response::Response;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records its name on the way in and `/name` on the way out.
    struct Record {
        name: &'static str,
        log: Log,
    }

    impl Layer for Record {
        fn name(&self) -> &str {
            self.name
        }

        fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint {
            Arc::new(RecordEndpoint { name: self.name, log: Arc::clone(&self.log), inner })
        }
    }

    struct RecordEndpoint {
        name: &'static str,
        log: Log,
        inner: BoxEndpoint,
    }

    impl Endpoint for RecordEndpoint {
        fn call(&self, req: Request) -> BoxFuture {
            self.log.lock().unwrap().push(self.name.to_owned());
            let fut = self.inner.call(req);
            let (name, log) = (self.name, Arc::clone(&self.log));
            Box::pin(async move {
                let outcome = fut.await;
                log.lock().unwrap().push(format!("/{name}"));
                outcome
            })
        }
    }

    fn record(name: &'static str, log: &Log) -> Middleware {
        Middleware::new(Record { name, log: Arc::clone(log) })
    }

    fn router(log: &Log) -> BoxEndpoint {
        let log = Arc::clone(log);
        (move |_req: Request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("router".to_owned());
                Response::text("ok")
            }
        })
        .into_endpoint()
    }

    fn req() -> Request {
        Request::from(http::Request::get("/").body("").unwrap())
    }

    async fn run(stack: BoxEndpoint) -> Response {
        stack.call(req()).await.unwrap()
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log = Log::default();
        let middleware = [record("m1", &log), record("m2", &log), record("m3", &log)];
        let handlers = ExceptionHandlers::new();

        run(StackBuilder::new(false, &handlers, &middleware).build(router(&log))).await;

        assert_eq!(
            *log.lock().unwrap(),
            ["m1", "m2", "m3", "router", "/m3", "/m2", "/m1"]
        );
    }

    #[tokio::test]
    async fn disabled_middleware_is_skipped() {
        let log = Log::default();
        let middleware = [
            record("m1", &log),
            record("m2", &log).with_enabled(false),
            record("m3", &log),
        ];
        let handlers = ExceptionHandlers::new();

        run(StackBuilder::new(false, &handlers, &middleware).build(router(&log))).await;

        assert_eq!(*log.lock().unwrap(), ["m1", "m3", "router", "/m3", "/m1"]);
    }

    #[tokio::test]
    async fn empty_middleware_still_has_boundary_layers() {
        let handlers = ExceptionHandlers::new();
        let boom = (|_req: Request| async { Err::<Response, _>(std::io::Error::other("boom")) })
            .into_endpoint();

        let res = run(StackBuilder::new(false, &handlers, &[]).build(boom)).await;

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn typed_handlers_run_inside_user_middleware() {
        let log = Log::default();
        let middleware = [record("m1", &log)];
        let mut handlers = ExceptionHandlers::new();
        let handler_log = Arc::clone(&log);
        handlers.insert(StatusCode::IM_A_TEAPOT, move |_req: Request, _f: Fault| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().unwrap().push("teapot".to_owned());
                StatusCode::IM_A_TEAPOT
            }
        });
        let teapot = (|_req: Request| async {
            Err::<Response, _>(Fault::http(StatusCode::IM_A_TEAPOT))
        })
        .into_endpoint();

        let res = run(StackBuilder::new(false, &handlers, &middleware).build(teapot)).await;

        assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
        assert_eq!(*log.lock().unwrap(), ["m1", "teapot", "/m1"]);
    }

    #[tokio::test]
    async fn catch_all_handler_runs_outside_user_middleware() {
        let log = Log::default();
        let middleware = [record("m1", &log)];
        let mut handlers = ExceptionHandlers::new();
        let handler_log = Arc::clone(&log);
        handlers.insert(HandlerKey::SERVER_ERROR, move |_req: Request, _f: Fault| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().unwrap().push("crash".to_owned());
                (StatusCode::INTERNAL_SERVER_ERROR, "crashed")
            }
        });
        let boom = (|_req: Request| async { Err::<Response, _>(std::io::Error::other("boom")) })
            .into_endpoint();

        let res = run(StackBuilder::new(false, &handlers, &middleware).build(boom)).await;

        assert_eq!(res.text_body(), "crashed");
        assert_eq!(*log.lock().unwrap(), ["m1", "/m1", "crash"]);
    }
}
