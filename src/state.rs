//! Application-wide state.

use std::sync::Arc;

use http::Extensions;

/// A typed map of values shared by every request an application handles.
///
/// Fill it during setup through
/// [`Application::state_mut`](crate::Application::state_mut); read it from
/// any handler through [`Request::state`](crate::Request::state). Cloning is
/// one atomic increment.
///
/// ```rust
/// use strata::{Application, Request, Response};
///
/// #[derive(Clone)]
/// struct Greeting(&'static str);
///
/// async fn hello(req: Request) -> Response {
///     let greeting = req.state().get::<Greeting>().map_or("hi", |g| g.0);
///     Response::text(greeting)
/// }
///
/// let mut app = Application::new();
/// app.state_mut().insert(Greeting("hello"));
/// app.add_route("/", hello).unwrap();
/// ```
#[derive(Clone, Debug, Default)]
pub struct State(Arc<Extensions>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value of the same type.
    ///
    /// Copies the underlying map if it is already shared with a running
    /// stack, so writes after setup never leak into in-flight requests.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        Arc::make_mut(&mut self.0).insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.0.get::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.get::<T>().is_some()
    }
}
