//! Function middleware.

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxEndpoint, BoxFuture, Endpoint};
use crate::middleware::{Layer, Next};
use crate::request::Request;
use crate::response::IntoOutcome;

/// Turns `async fn(Request, Next) -> impl IntoOutcome` into a [`Layer`].
///
/// The function decides whether, when and with what request to call
/// [`Next::run`]; not calling it short-circuits the chain.
pub fn from_fn<F, Fut, R>(name: impl Into<String>, f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    FromFn { name: name.into(), f: Arc::new(f) }
}

/// The layer returned by [`from_fn`].
pub struct FromFn<F> {
    name: String,
    f: Arc<F>,
}

impl<F, Fut, R> Layer for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint {
        Arc::new(FnMiddleware { f: Arc::clone(&self.f), inner })
    }
}

struct FnMiddleware<F> {
    f: Arc<F>,
    inner: BoxEndpoint,
}

impl<F, Fut, R> Endpoint for FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.f)(req, Next::new(Arc::clone(&self.inner)));
        Box::pin(async move { fut.await.into_outcome() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handler;
    use crate::fault::Fault;
    use crate::response::Response;
    use http::StatusCode;

    async fn ok(_req: Request) -> Response {
        Response::text("inner")
    }

    #[tokio::test]
    async fn can_short_circuit() {
        let layer = from_fn("deny", |_req: Request, _next: Next| async {
            StatusCode::FORBIDDEN
        });
        let endpoint = layer.wrap(ok.into_endpoint());
        let req = Request::from(http::Request::get("/").body("").unwrap());
        let res = endpoint.call(req).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn can_post_process() {
        let layer = from_fn("shout", |req: Request, next: Next| async move {
            let res = next.run(req).await?;
            Ok::<_, Fault>(res.text_body().to_uppercase())
        });
        let endpoint = layer.wrap(ok.into_endpoint());
        let req = Request::from(http::Request::get("/").body("").unwrap());
        assert_eq!(endpoint.call(req).await.unwrap().text_body(), "INNER");
    }
}
