//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. Requests that match no
//! route fall through to host-based and prefix-based sub-apps; requests that
//! match nothing at all become an HTTP fault (404, or 405 when the path exists
//! under another method) so registered exception handlers can answer them.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{ALLOW, HOST, HeaderValue};
use http::uri::Authority;
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::fault::Fault;
use crate::handler::{BoxEndpoint, BoxFuture, Endpoint, Handler};
use crate::lifespan::{LifecycleEvent, LifecycleHook, Lifespan};
use crate::request::Request;

/// Something a [`Router`] can hand a request off to by prefix or host.
///
/// Mounting a `Router` keeps its named routes reachable through
/// [`Router::url_path_for`]; anything else is opaque.
#[derive(Clone)]
pub enum MountTarget {
    Router(Arc<Router>),
    Endpoint(BoxEndpoint),
}

impl MountTarget {
    fn endpoint(&self) -> BoxEndpoint {
        match self {
            Self::Router(router) => Arc::clone(router) as BoxEndpoint,
            Self::Endpoint(endpoint) => Arc::clone(endpoint),
        }
    }
}

impl From<Router> for MountTarget {
    fn from(router: Router) -> Self {
        Self::Router(Arc::new(router))
    }
}

impl From<BoxEndpoint> for MountTarget {
    fn from(endpoint: BoxEndpoint) -> Self {
        Self::Endpoint(endpoint)
    }
}

#[derive(Clone)]
struct Mount {
    prefix: String,
    name: Option<String>,
    target: MountTarget,
}

#[derive(Clone)]
struct HostRoute {
    host: String,
    target: MountTarget,
}

/// The application router.
///
/// One radix tree per HTTP method, so lookup is O(path-length). Each
/// [`Router::on`] call returns `self` so registrations chain naturally; the `add_*` methods are the fallible, in-place variants
/// used by [`Application`](crate::Application).
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxEndpoint>>,
    names: HashMap<String, String>,
    hosts: Vec<HostRoute>,
    mounts: Vec<Mount>,
    lifespan: Lifespan,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust
    /// # use strata::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// # async fn delete_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::DELETE, "/users/{id}", delete_user)
    ///     .on(Method::GET,    "/users/{id}", get_user)
    ///     .on(Method::POST,   "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Use [`add_route`](Self::add_route) to get an
    /// error instead.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.insert(&[method], path, handler.into_endpoint())
            .unwrap_or_else(|e| panic!("{e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Registers `handler` for every method in `methods`.
    pub fn add_route(
        &mut self,
        methods: &[Method],
        path: &str,
        handler: impl Handler,
    ) -> Result<(), Error> {
        self.insert(methods, path, handler.into_endpoint())
    }

    /// Like [`add_route`](Self::add_route), and records the path under
    /// `name` for [`url_path_for`](Self::url_path_for).
    pub fn add_named_route(
        &mut self,
        name: &str,
        methods: &[Method],
        path: &str,
        handler: impl Handler,
    ) -> Result<(), Error> {
        self.insert(methods, path, handler.into_endpoint())?;
        self.names.insert(name.to_owned(), path.to_owned());
        Ok(())
    }

    /// All or nothing: the trees are only replaced once `path` went into
    /// every one of them.
    fn insert(&mut self, methods: &[Method], path: &str, endpoint: BoxEndpoint) -> Result<(), Error> {
        let mut staged: HashMap<Method, MatchitRouter<BoxEndpoint>> = HashMap::new();
        for method in methods {
            staged
                .entry(method.clone())
                .or_insert_with(|| self.routes.get(method).cloned().unwrap_or_default())
                .insert(path, Arc::clone(&endpoint))
                .map_err(|source| Error::InvalidRoute { path: path.to_owned(), source })?;
        }
        self.routes.extend(staged);
        Ok(())
    }

    /// Hands every request under `path` to `target`, with the prefix moved
    /// from [`Request::path`] to [`Request::root_path`].
    ///
    /// Trailing slashes on `path` are ignored; an empty path mounts at the
    /// root and catches everything no route claimed.
    pub fn mount(&mut self, path: &str, target: impl Into<MountTarget>) -> Result<(), Error> {
        self.push_mount(None, path, target.into())
    }

    /// Like [`mount`](Self::mount); routes named `child` inside a mounted
    /// `Router` become reachable as `"{name}:child"`.
    pub fn mount_named(
        &mut self,
        name: &str,
        path: &str,
        target: impl Into<MountTarget>,
    ) -> Result<(), Error> {
        self.push_mount(Some(name.to_owned()), path, target.into())
    }

    fn push_mount(&mut self, name: Option<String>, path: &str, target: MountTarget) -> Result<(), Error> {
        let prefix = path.trim_end_matches('/');
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(Error::InvalidMount(path.to_owned()));
        }
        self.mounts.push(Mount { prefix: prefix.to_owned(), name, target });
        Ok(())
    }

    /// Hands every request whose `Host` header is `host` (port ignored,
    /// case-insensitive) to `target`.
    pub fn host(&mut self, host: &str, target: impl Into<MountTarget>) {
        self.hosts.push(HostRoute { host: host.to_ascii_lowercase(), target: target.into() });
    }

    pub fn on_event(&mut self, event: LifecycleEvent, hook: impl LifecycleHook) {
        self.lifespan.add(event, hook);
    }

    pub fn lifespan(&self) -> &Lifespan {
        &self.lifespan
    }

    pub(crate) fn lifespan_mut(&mut self) -> &mut Lifespan {
        &mut self.lifespan
    }

    /// Builds the path of the route registered under `name`.
    ///
    /// `params` must name exactly the route's path parameters.
    ///
    /// ```rust
    /// # use strata::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// let mut router = Router::new();
    /// router.add_named_route("user", &[Method::GET], "/users/{id}", get_user).unwrap();
    /// assert_eq!(router.url_path_for("user", &[("id", "42")]).unwrap(), "/users/42");
    /// ```
    pub fn url_path_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        if let Some(template) = self.names.get(name) {
            return fill_template(name, template, params);
        }

        if let Some((mount_name, child)) = name.split_once(':') {
            for mount in &self.mounts {
                if mount.name.as_deref() != Some(mount_name) {
                    continue;
                }
                let MountTarget::Router(router) = &mount.target else {
                    continue;
                };
                match router.url_path_for(child, params) {
                    Err(Error::NoRouteNamed(_)) => continue,
                    other => return other.map(|path| format!("{}{path}", mount.prefix)),
                }
            }
        }

        Err(Error::NoRouteNamed(name.to_owned()))
    }

    // ── Resolution ────────────────────────────────────────────────────────────

    fn resolve(&self, req: &mut Request) -> Result<BoxEndpoint, Fault> {
        if let Some((endpoint, params)) = self.lookup(req.method(), req.path()) {
            req.set_params(params);
            return Ok(endpoint);
        }

        if let Some(host) = request_host(req) {
            if let Some(route) = self.hosts.iter().find(|h| h.host == host) {
                return Ok(route.target.endpoint());
            }
        }

        for mount in &self.mounts {
            if let Some(remainder) = strip_mount(&mount.prefix, req.path()) {
                req.enter_mount(&mount.prefix, remainder);
                return Ok(mount.target.endpoint());
            }
        }

        let allowed = self.allowed_methods(req.path());
        if allowed.is_empty() {
            return Err(Fault::http(StatusCode::NOT_FOUND));
        }
        let fault = Fault::http(StatusCode::METHOD_NOT_ALLOWED);
        Err(match HeaderValue::from_str(&allowed.join(", ")) {
            Ok(value) => fault.with_header(ALLOW, value),
            Err(_) => fault,
        })
    }

    /// HEAD requests fall back to the GET tree.
    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxEndpoint, HashMap<String, String>)> {
        let found = self.routes.get(method).and_then(|tree| tree.at(path).ok());
        let matched = match found {
            Some(m) => m,
            None if *method == Method::HEAD => self.routes.get(&Method::GET)?.at(path).ok()?,
            None => return None,
        };
        let endpoint = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((endpoint, params))
    }

    fn allowed_methods(&self, path: &str) -> Vec<&str> {
        let mut allowed: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        if allowed.contains(&"GET") && !allowed.contains(&"HEAD") {
            allowed.push("HEAD");
        }
        allowed.sort_unstable();
        allowed
    }
}

impl Endpoint for Router {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.resolve(&mut req) {
            Ok(endpoint) => endpoint.call(req),
            Err(fault) => Box::pin(async move { Err(fault) }),
        }
    }
}

fn request_host(req: &Request) -> Option<String> {
    let host = match req.header(HOST.as_str()) {
        Some(raw) => raw.parse::<Authority>().ok()?.host().to_owned(),
        None => req.uri().host()?.to_owned(),
    };
    Some(host.to_ascii_lowercase())
}

/// `Some(remainder)` when `path` is `prefix` or lies under it on a segment
/// boundary.
fn strip_mount(prefix: &str, path: &str) -> Option<String> {
    if prefix.is_empty() {
        return Some(path.to_owned());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_owned())
    } else if rest.starts_with('/') {
        Some(rest.to_owned())
    } else {
        None
    }
}

fn fill_template(name: &str, template: &str, params: &[(&str, &str)]) -> Result<String, Error> {
    let mut expected = template_params(template);
    let mut provided: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
    expected.sort_unstable();
    provided.sort_unstable();
    if expected != provided {
        return Err(Error::PathParams {
            name: name.to_owned(),
            expected: expected.into_iter().map(str::to_owned).collect(),
        });
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, key, after)) = next_param(rest) {
        out.push_str(before);
        if let Some((_, value)) = params.iter().find(|(k, _)| *k == key) {
            out.push_str(value);
        }
        rest = after;
    }
    out.push_str(rest);
    Ok(out)
}

fn template_params(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some((_, key, after)) = next_param(rest) {
        names.push(key);
        rest = after;
    }
    names
}

/// Splits `s` around its first `{param}` / `{*param}` segment.
fn next_param(s: &str) -> Option<(&str, &str, &str)> {
    let start = s.find('{')?;
    let len = s[start..].find('}')?;
    let key = s[start + 1..start + len].trim_start_matches('*');
    Some((&s[..start], key, &s[start + len + 1..]))
}
