//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::state::State;

/// An incoming HTTP request with its body fully buffered.
///
/// Cloning is cheap apart from the header map: the body is a reference-counted
/// [`Bytes`] and the application state is an `Arc`.
///
/// Any `http::Request` converts into one, which is the easiest way to drive an
/// [`Application`](crate::Application) in tests:
///
/// ```rust
/// use strata::Request;
///
/// let req = Request::from(http::Request::get("/users/7?full=1").body("").unwrap());
/// assert_eq!(req.path(), "/users/7");
/// assert_eq!(req.query(), Some("full=1"));
/// ```
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    path: String,
    root_path: String,
    params: HashMap<String, String>,
    state: State,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let path = parts.uri.path().to_owned();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            path,
            root_path: String::new(),
            params: HashMap::new(),
            state: State::default(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn query(&self) -> Option<&str> { self.uri.query() }

    /// The path still to be routed. Inside a mounted app this is the part
    /// after the mount prefix.
    pub fn path(&self) -> &str { &self.path }

    /// Everything mount prefixes have stripped from [`path`](Self::path), so
    /// far. Empty for requests that have not passed through a mount.
    pub fn root_path(&self) -> &str { &self.root_path }

    /// Application-wide state of the application handling this request.
    pub fn state(&self) -> &State { &self.state }

    /// Header lookup. Returns `None` for values that are not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// A copy of this request without its body, handed to exception handlers.
    pub(crate) fn head(&self) -> Self {
        Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            body: Bytes::new(),
            path: self.path.clone(),
            root_path: self.root_path.clone(),
            params: self.params.clone(),
            state: self.state.clone(),
        }
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Moves `prefix` from the routed path onto the root path.
    pub(crate) fn enter_mount(&mut self, prefix: &str, remainder: String) {
        self.root_path.push_str(prefix);
        self.path = remainder;
    }
}

impl<B: Into<Bytes>> From<http::Request<B>> for Request {
    fn from(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::from(
            http::Request::get("/")
                .header("X-Request-Id", "abc")
                .body("")
                .unwrap(),
        );
        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.header("X-REQUEST-ID"), Some("abc"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn head_drops_the_body_only() {
        let mut req = Request::from(http::Request::post("/a/b").body("payload").unwrap());
        req.enter_mount("/a", "/b".to_owned());
        let head = req.head();
        assert!(head.body().is_empty());
        assert_eq!(head.path(), "/b");
        assert_eq!(head.root_path(), "/a");
        assert_eq!(head.method(), Method::POST);
    }
}
