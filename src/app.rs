//! The application: router, middleware, exception handlers and lifecycle
//! hooks behind one callable entry point.

use std::any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use http::Method;
use tracing::{debug, error, warn};

use crate::capabilities::Capabilities;
use crate::config::AppConfig;
use crate::error::Error;
use crate::handler::{BoxEndpoint, BoxFuture, Endpoint, ErrorHandler, Handler};
use crate::lifespan::{LifecycleEvent, LifecycleHook, Lifespan};
use crate::middleware::{self, ExceptionHandlers, HandlerKey, Middleware, MiddlewareKind, Next};
use crate::request::Request;
use crate::response::{IntoOutcome, Response};
use crate::router::{MountTarget, Router};
use crate::stack::StackBuilder;
use crate::state::State;

/// An HTTP application.
///
/// Every mutator rebuilds the middleware stack before returning, so the next
/// request always sees the current configuration.
///
/// ```rust
/// use strata::{Application, Request, Response};
///
/// async fn hello(_req: Request) -> Response {
///     Response::text("hello")
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut app = Application::new();
/// app.add_route("/", hello).unwrap();
///
/// let res = app.handle(Request::from(http::Request::get("/").body("").unwrap())).await;
/// assert_eq!(res.text_body(), "hello");
/// # }
/// ```
pub struct Application {
    debug: bool,
    state: State,
    router: Router,
    exception_handlers: ExceptionHandlers,
    user_middleware: Vec<Middleware>,
    capabilities: Capabilities,
    config: AppConfig,
    stack: BoxEndpoint,
}

impl Application {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::builder().config(config.clone()).build()
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
        self.rebuild();
    }

    /// Adds `middleware` in front of every middleware already registered, so
    /// it becomes the outermost user middleware.
    ///
    /// A `[middleware.<name>]` entry in the configuration overrides its
    /// `enabled` flag.
    pub fn add_middleware(&mut self, middleware: Middleware) {
        let middleware = configured(&self.config, middleware);
        self.user_middleware.insert(0, middleware);
        self.rebuild();
    }

    /// Registers `f` as function middleware of the given kind, named after
    /// the function.
    ///
    /// `"http"` is the only kind there is:
    ///
    /// ```rust
    /// # use strata::{Application, Fault, Request, Response, middleware::Next};
    /// async fn stamp(req: Request, next: Next) -> Result<Response, Fault> {
    ///     next.run(req).await
    /// }
    ///
    /// let mut app = Application::new();
    /// app.middleware("http", stamp).unwrap();
    /// assert_eq!(app.user_middleware()[0].name(), "stamp");
    /// assert!(app.middleware("websocket", stamp).is_err());
    /// ```
    ///
    /// Closures have no name of their own: they are all registered as
    /// `{{closure}}`, so a `[middleware]` config entry cannot tell them apart.
    /// Register closures through [`middleware_named`](Self::middleware_named).
    pub fn middleware<F, Fut, R>(&mut self, kind: &str, f: F) -> Result<(), Error>
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + Send + 'static,
    {
        let name = fn_name::<F>();
        if name == CLOSURE_NAME {
            warn!(
                type_name = any::type_name::<F>(),
                "closure middleware has no distinct name; use `middleware_named` to configure it"
            );
        }
        self.middleware_named(kind, name, f)
    }

    /// Like [`middleware`](Self::middleware), under an explicit name. The
    /// name is the key of its `[middleware.<name>]` config entry.
    pub fn middleware_named<F, Fut, R>(&mut self, kind: &str, name: &str, f: F) -> Result<(), Error>
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoOutcome + Send + 'static,
    {
        match kind.parse::<MiddlewareKind>()? {
            MiddlewareKind::Http => {
                self.add_middleware(Middleware::new(middleware::from_fn(name, f)));
                Ok(())
            }
        }
    }

    /// Registers `handler` for HTTP faults with a status code, or for faults
    /// of one error type.
    ///
    /// [`HandlerKey::SERVER_ERROR`] and [`HandlerKey::any()`] install the
    /// top-level error handler instead, which runs outside every middleware.
    pub fn add_exception_handler(&mut self, key: impl Into<HandlerKey>, handler: impl ErrorHandler) {
        self.exception_handlers.insert(key, handler);
        self.rebuild();
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    /// Registers a GET route. It answers HEAD requests too.
    pub fn add_route(&mut self, path: &str, handler: impl Handler) -> Result<(), Error> {
        self.add_route_with(&[Method::GET], path, handler)
    }

    /// Registers `handler` for every method in `methods`. On error nothing is
    /// registered, for any of them.
    pub fn add_route_with(
        &mut self,
        methods: &[Method],
        path: &str,
        handler: impl Handler,
    ) -> Result<(), Error> {
        self.router.add_route(methods, path, handler)?;
        self.rebuild();
        Ok(())
    }

    pub fn add_named_route(
        &mut self,
        name: &str,
        methods: &[Method],
        path: &str,
        handler: impl Handler,
    ) -> Result<(), Error> {
        self.router.add_named_route(name, methods, path, handler)?;
        self.rebuild();
        Ok(())
    }

    pub fn mount(&mut self, path: &str, target: impl Into<MountTarget>) -> Result<(), Error> {
        self.router.mount(path, target)?;
        self.rebuild();
        Ok(())
    }

    pub fn mount_named(
        &mut self,
        name: &str,
        path: &str,
        target: impl Into<MountTarget>,
    ) -> Result<(), Error> {
        self.router.mount_named(name, path, target)?;
        self.rebuild();
        Ok(())
    }

    pub fn host(&mut self, host: &str, target: impl Into<MountTarget>) {
        self.router.host(host, target);
        self.rebuild();
    }

    pub fn url_path_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        self.router.url_path_for(name, params)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Registers a hook for `"startup"` or `"shutdown"`.
    pub fn on_event(&mut self, event: &str, hook: impl LifecycleHook) -> Result<(), Error> {
        self.add_event_handler(event.parse()?, hook);
        Ok(())
    }

    pub fn add_event_handler(&mut self, event: LifecycleEvent, hook: impl LifecycleHook) {
        self.router.on_event(event, hook);
    }

    pub async fn startup(&self) -> Result<(), Error> {
        self.router.lifespan().startup().await.map_err(Error::Startup)
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.router.lifespan().shutdown().await.map_err(Error::Shutdown)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Values inserted here are visible to every request handled afterwards.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn user_middleware(&self) -> &[Middleware] {
        &self.user_middleware
    }

    pub fn exception_handlers(&self) -> &ExceptionHandlers {
        &self.exception_handlers
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ── Invocation ────────────────────────────────────────────────────────────

    /// Runs `req` through the middleware stack.
    pub async fn handle(&self, req: Request) -> Response {
        match self.call(req).await {
            Ok(res) => res,
            // ServerErrors is always outermost, so this only happens when a
            // user layer bypasses it.
            Err(fault) => {
                error!(kind = %fault.kind(), "fault escaped the middleware stack: {fault}");
                middleware::generic_response()
            }
        }
    }

    fn rebuild(&mut self) {
        let router: BoxEndpoint = Arc::new(self.router.clone());
        self.stack = StackBuilder::new(self.debug, &self.exception_handlers, &self.user_middleware)
            .build(router);
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for Application {
    fn call(&self, mut req: Request) -> BoxFuture {
        req.set_state(self.state.clone());
        self.stack.call(req)
    }
}

impl From<Application> for MountTarget {
    fn from(app: Application) -> Self {
        Self::Endpoint(Arc::new(app))
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("debug", &self.debug)
            .field("exception_handlers", &self.exception_handlers)
            .field("user_middleware", &self.user_middleware)
            .field("capabilities", &self.capabilities)
            .field("lifespan", self.router.lifespan())
            .finish_non_exhaustive()
    }
}

fn configured(config: &AppConfig, middleware: Middleware) -> Middleware {
    match config.middleware_enabled(middleware.name()) {
        Some(enabled) => {
            debug!(middleware = middleware.name(), enabled, "middleware overridden by config");
            middleware.with_enabled(enabled)
        }
        None => middleware,
    }
}

const CLOSURE_NAME: &str = "{{closure}}";

/// `my_crate::auth::require_token` -> `require_token`.
fn fn_name<F>() -> &'static str {
    let full = any::type_name::<F>();
    full.rsplit("::").next().unwrap_or(full)
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Configures an [`Application`] in one expression.
///
/// ```rust
/// use strata::{Application, AppConfig, Middleware, middleware::Trace};
///
/// let app = Application::builder()
///     .config(AppConfig::from_toml("debug = true").unwrap())
///     .middleware(Middleware::new(Trace::new()))
///     .state(42_u32)
///     .build();
///
/// assert!(app.debug());
/// assert_eq!(app.state().get::<u32>(), Some(&42));
/// ```
#[derive(Default)]
pub struct ApplicationBuilder {
    debug: Option<bool>,
    router: Router,
    middleware: Vec<Middleware>,
    exception_handlers: ExceptionHandlers,
    lifespan: Lifespan,
    capabilities: Option<Capabilities>,
    config: AppConfig,
    state: State,
}

impl ApplicationBuilder {
    /// Overrides `debug` from the configuration.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Replaces the router. Hooks registered on the builder are kept.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Appends `middleware`: the first one added ends up outermost.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn exception_handler(mut self, key: impl Into<HandlerKey>, handler: impl ErrorHandler) -> Self {
        self.exception_handlers.insert(key, handler);
        self
    }

    pub fn on_startup(mut self, hook: impl LifecycleHook) -> Self {
        self.lifespan.add(LifecycleEvent::Startup, hook);
        self
    }

    pub fn on_shutdown(mut self, hook: impl LifecycleHook) -> Self {
        self.lifespan.add(LifecycleEvent::Shutdown, hook);
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`Capabilities::detect`].
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn state<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.state.insert(value);
        self
    }

    pub fn build(self) -> Application {
        let Self { debug, mut router, middleware, exception_handlers, lifespan, capabilities, config, state } = self;

        router.lifespan_mut().append(lifespan);
        let user_middleware = middleware
            .into_iter()
            .map(|m| configured(&config, m))
            .collect();
        let debug = debug.unwrap_or(config.debug);

        let mut app = Application {
            debug,
            state,
            router,
            exception_handlers,
            user_middleware,
            capabilities: capabilities.unwrap_or_else(Capabilities::detect),
            config,
            stack: Arc::new(Router::new()),
        };
        app.rebuild();
        app
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::fault::Fault;

    fn get(path: &str) -> Request {
        Request::from(http::Request::get(path).body("").unwrap())
    }

    async fn hello(_req: Request) -> Response {
        Response::text("hello")
    }

    async fn boom(_req: Request) -> Result<Response, Fault> {
        Err(std::io::Error::other("disk on fire").into())
    }

    #[tokio::test]
    async fn set_debug_rebuilds_the_stack() {
        let mut app = Application::new();
        app.add_route("/boom", boom).unwrap();

        let res = app.handle(get("/boom")).await;
        assert_eq!(res.text_body(), "Internal Server Error");

        app.set_debug(true);
        let res = app.handle(get("/boom")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.text_body().contains("disk on fire"));
    }

    #[tokio::test]
    async fn state_is_injected() {
        async fn count(req: Request) -> String {
            req.state().get::<u32>().copied().unwrap_or_default().to_string()
        }

        let mut app = Application::builder().state(7_u32).build();
        app.add_route("/", count).unwrap();
        assert_eq!(app.handle(get("/")).await.text_body(), "7");

        app.state_mut().insert(8_u32);
        assert_eq!(app.handle(get("/")).await.text_body(), "8");
    }

    #[test]
    fn config_sets_debug_unless_overridden() {
        let config = AppConfig::from_toml("debug = true").unwrap();
        assert!(Application::from_config(&config).debug());
        assert!(!Application::builder().config(config).debug(false).build().debug());
    }

    #[test]
    fn config_overrides_middleware_enabled() {
        let config = AppConfig::from_toml("[middleware.trace]\nenabled = false").unwrap();
        let mut app = Application::builder()
            .config(config)
            .middleware(Middleware::new(middleware::Trace::new()))
            .build();
        assert!(!app.user_middleware()[0].is_enabled());

        app.add_middleware(Middleware::new(middleware::Trace::new()));
        assert!(!app.user_middleware()[0].is_enabled());
    }

    #[test]
    fn unknown_event_is_rejected() {
        let mut app = Application::new();
        assert!(matches!(
            app.on_event("teardown", || async {}),
            Err(Error::UnknownLifecycleEvent(_))
        ));
        app.on_event("startup", || async {}).unwrap();
        assert_eq!(app.router().lifespan().len(LifecycleEvent::Startup), 1);
    }

    #[tokio::test]
    async fn builder_hooks_run_after_router_hooks() {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        let r = Arc::clone(&ran);
        router.on_event(LifecycleEvent::Startup, move || {
            let r = Arc::clone(&r);
            async move { r.lock().unwrap().push("router") }
        });
        let r = Arc::clone(&ran);
        let app = Application::builder()
            .on_startup(move || {
                let r = Arc::clone(&r);
                async move { r.lock().unwrap().push("builder") }
            })
            .router(router)
            .build();

        app.startup().await.unwrap();
        assert_eq!(*ran.lock().unwrap(), ["router", "builder"]);
    }

    #[tokio::test]
    async fn failing_startup_hook_is_reported() {
        let app = Application::builder()
            .on_startup(|| async { Err::<(), _>(std::io::Error::other("no database")) })
            .build();
        assert!(matches!(app.startup().await, Err(Error::Startup(_))));
    }

    #[tokio::test]
    async fn mounted_application_uses_its_own_state() {
        async fn which(req: Request) -> String {
            req.state().get::<&'static str>().copied().unwrap_or("none").to_owned()
        }

        let mut inner = Application::builder().state("inner").build();
        inner.add_route("/which", which).unwrap();

        let mut outer = Application::builder().state("outer").build();
        outer.add_route("/which", which).unwrap();
        outer.mount("/inner", inner).unwrap();

        assert_eq!(outer.handle(get("/which")).await.text_body(), "outer");
        assert_eq!(outer.handle(get("/inner/which")).await.text_body(), "inner");
    }

    #[test]
    fn middleware_name_comes_from_the_function() {
        async fn require_token(req: Request, next: Next) -> Result<Response, Fault> {
            next.run(req).await
        }

        let mut app = Application::new();
        app.middleware("http", require_token).unwrap();
        assert_eq!(app.user_middleware()[0].name(), "require_token");
    }

    #[test]
    fn named_closure_middleware_is_configured_individually() {
        let config = AppConfig::from_toml("[middleware.audit]\nenabled = false").unwrap();
        let mut app = Application::from_config(&config);
        app.middleware_named("http", "audit", |req: Request, next: Next| next.run(req)).unwrap();
        app.middleware_named("http", "cors", |req: Request, next: Next| next.run(req)).unwrap();

        let names: Vec<_> = app
            .user_middleware()
            .iter()
            .map(|m| (m.name(), m.is_enabled()))
            .collect();
        assert_eq!(names, [("cors", true), ("audit", false)]);
    }

    #[test]
    fn unnamed_closures_share_a_name() {
        let mut app = Application::new();
        app.middleware("http", |req: Request, next: Next| next.run(req)).unwrap();
        assert_eq!(app.user_middleware()[0].name(), CLOSURE_NAME);
        assert!(matches!(
            app.middleware_named("websocket", "ws", |req: Request, next: Next| next.run(req)),
            Err(Error::UnsupportedMiddlewareKind(_))
        ));
    }

    #[tokio::test]
    async fn hello_route_answers_head() {
        let mut app = Application::new();
        app.add_route("/", hello).unwrap();
        let res = app.handle(Request::from(http::Request::head("/").body("").unwrap())).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }
}
