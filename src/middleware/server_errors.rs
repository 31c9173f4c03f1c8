//! The outermost layer of every stack.
//!
//! Nothing escapes it: faults that no typed handler claimed, faults raised by
//! typed handlers themselves, and panics all end up here and are turned into a
//! `500` response.

use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use http::header::ACCEPT;
use tracing::error;

use crate::fault::Fault;
use crate::handler::{BoxEndpoint, BoxErrorHandler, BoxFuture, Endpoint};
use crate::middleware::Layer;
use crate::request::Request;
use crate::response::Response;

/// Catches every fault escaping the chain.
///
/// - `debug` on: a diagnostic response with the fault kind, message, source
///   chain and (when captured) backtrace. HTML if the client accepts
///   `text/html`, plain text otherwise. Takes precedence over `handler`.
/// - `handler` set: its response is used. If it fails too, the generic
///   response is sent.
/// - otherwise: `500 Internal Server Error`, plain text, no details.
pub struct ServerErrors {
    handler: Option<BoxErrorHandler>,
    debug: bool,
}

impl ServerErrors {
    pub(crate) fn new(handler: Option<BoxErrorHandler>, debug: bool) -> Self {
        Self { handler, debug }
    }
}

impl Layer for ServerErrors {
    fn name(&self) -> &str {
        "server-errors"
    }

    fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint {
        Arc::new(ServerErrorsEndpoint {
            inner,
            handler: self.handler.clone(),
            debug: self.debug,
        })
    }
}

struct ServerErrorsEndpoint {
    inner: BoxEndpoint,
    handler: Option<BoxErrorHandler>,
    debug: bool,
}

impl Endpoint for ServerErrorsEndpoint {
    fn call(&self, req: Request) -> BoxFuture {
        let head = req.head();
        let handler = self.handler.clone();
        let debug = self.debug;

        // Layers may panic while building their future as well as while it is
        // polled.
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let fault = Fault::from_panic(payload);
                return Box::pin(async move { Ok(recover(head, fault, handler, debug).await) });
            }
        };

        Box::pin(async move {
            let fault = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(res)) => return Ok(res),
                Ok(Err(fault)) => fault,
                Err(payload) => Fault::from_panic(payload),
            };
            Ok(recover(head, fault, handler, debug).await)
        })
    }
}

async fn recover(head: Request, fault: Fault, handler: Option<BoxErrorHandler>, debug: bool) -> Response {
    error!(
        kind = %fault.kind(),
        method = %head.method(),
        path = head.path(),
        "unhandled fault: {fault}"
    );

    if debug {
        return debug_response(&head, &fault);
    }

    let Some(handler) = handler else {
        return generic_response();
    };

    match AssertUnwindSafe(handler.call(head, fault)).catch_unwind().await {
        Ok(Ok(res)) => res,
        Ok(Err(fault)) => {
            error!(kind = %fault.kind(), "server error handler failed: {fault}");
            generic_response()
        }
        Err(payload) => {
            let fault = Fault::from_panic(payload);
            error!(kind = %fault.kind(), "server error handler panicked: {fault}");
            generic_response()
        }
    }
}

pub(crate) fn generic_response() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .text("Internal Server Error")
}

fn debug_response(head: &Request, fault: &Fault) -> Response {
    let wants_html = head
        .headers()
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/html"));

    let builder = Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR);
    if wants_html {
        builder.bytes(crate::ContentType::Html, render_html(head, fault))
    } else {
        builder.text(render_text(head, fault))
    }
}

fn render_text(head: &Request, fault: &Fault) -> String {
    let mut out = format!("{}: {}\n\n{} {}\n", fault.kind(), fault, head.method(), head.uri());
    let mut causes = fault.chain().skip(1).peekable();
    if causes.peek().is_some() {
        out.push_str("\nCaused by:\n");
        for cause in causes {
            let _ = writeln!(out, "    {cause}");
        }
    }
    if let Some(bt) = fault.backtrace() {
        let _ = write!(out, "\nBacktrace:\n{bt}");
    }
    out
}

fn render_html(head: &Request, fault: &Fault) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Internal Server Error</title></head>\n<body>\n",
    );
    let _ = writeln!(out, "<h1>500 Internal Server Error</h1>");
    let _ = writeln!(
        out,
        "<h2>{}</h2>\n<p>{}</p>\n<p><code>{} {}</code></p>",
        escape(fault.kind().name()),
        escape(&fault.to_string()),
        escape(head.method().as_str()),
        escape(&head.uri().to_string()),
    );
    let causes: Vec<String> = fault.chain().skip(1).map(|c| escape(&c.to_string())).collect();
    if !causes.is_empty() {
        out.push_str("<h3>Caused by</h3>\n<ol>\n");
        for cause in causes {
            let _ = writeln!(out, "<li>{cause}</li>");
        }
        out.push_str("</ol>\n");
    }
    if let Some(bt) = fault.backtrace() {
        let _ = writeln!(out, "<h3>Backtrace</h3>\n<pre>{}</pre>", escape(&bt.to_string()));
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Handler;
    use crate::handler::ErrorHandler;

    #[derive(Debug, thiserror::Error)]
    #[error("query <failed>")]
    struct QueryFailed(#[source] std::io::Error);

    fn get(accept: Option<&str>) -> Request {
        let mut builder = http::Request::get("/orders");
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        Request::from(builder.body("").unwrap())
    }

    async fn failing(_req: Request) -> Result<Response, Fault> {
        Err(QueryFailed(std::io::Error::other("connection reset")).into())
    }

    async fn panicking(_req: Request) -> Response {
        panic!("index out of bounds");
    }

    async fn fine(_req: Request) -> Response {
        Response::text("fine")
    }

    fn layer(handler: Option<BoxErrorHandler>, debug: bool, inner: BoxEndpoint) -> BoxEndpoint {
        ServerErrors::new(handler, debug).wrap(inner)
    }

    #[tokio::test]
    async fn passes_responses_through() {
        let res = layer(None, false, fine.into_endpoint()).call(get(None)).await.unwrap();
        assert_eq!(res.text_body(), "fine");
    }

    #[tokio::test]
    async fn generic_response_hides_details() {
        let res = layer(None, false, failing.into_endpoint()).call(get(None)).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.text_body(), "Internal Server Error");
    }

    #[tokio::test]
    async fn debug_text_lists_the_chain() {
        let res = layer(None, true, failing.into_endpoint()).call(get(None)).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
        let body = res.text_body();
        assert!(body.contains("QueryFailed"));
        assert!(body.contains("query <failed>"));
        assert!(body.contains("connection reset"));
        assert!(body.contains("GET /orders"));
    }

    #[tokio::test]
    async fn debug_html_is_escaped() {
        let res = layer(None, true, failing.into_endpoint())
            .call(get(Some("text/html,application/xhtml+xml")))
            .await
            .unwrap();
        assert_eq!(res.headers()["content-type"], "text/html; charset=utf-8");
        let body = res.text_body();
        assert!(body.contains("query &lt;failed&gt;"));
        assert!(!body.contains("query <failed>"));
    }

    #[tokio::test]
    async fn custom_handler_is_used() {
        let handler = (|req: Request, fault: Fault| async move {
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .text(format!("{} failed: {}", req.path(), fault))
        })
        .into_boxed_error_handler();
        let res = layer(Some(handler), false, failing.into_endpoint()).call(get(None)).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.text_body(), "/orders failed: query <failed>");
    }

    #[tokio::test]
    async fn debug_wins_over_custom_handler() {
        let handler = (|_req: Request, _fault: Fault| async { "custom" }).into_boxed_error_handler();
        let res = layer(Some(handler), true, failing.into_endpoint()).call(get(None)).await.unwrap();
        assert!(res.text_body().contains("connection reset"));
    }

    #[tokio::test]
    async fn failing_custom_handler_falls_back() {
        let handler = (|_req: Request, _fault: Fault| async {
            Err::<Response, _>(std::io::Error::other("handler broke"))
        })
        .into_boxed_error_handler();
        let res = layer(Some(handler), false, failing.into_endpoint()).call(get(None)).await.unwrap();
        assert_eq!(res.text_body(), "Internal Server Error");
    }

    #[tokio::test]
    async fn panics_become_500() {
        let res = layer(None, false, panicking.into_endpoint()).call(get(None)).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let res = layer(None, true, panicking.into_endpoint()).call(get(None)).await.unwrap();
        assert!(res.text_body().contains("index out of bounds"));
    }

    #[test]
    fn escape_covers_markup() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;");
    }
}
