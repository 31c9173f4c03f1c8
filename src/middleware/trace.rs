//! Per-request tracing span.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use crate::handler::{BoxEndpoint, BoxFuture, Endpoint};
use crate::middleware::Layer;
use crate::request::Request;

/// Opens an `http.request` span around the rest of the chain and logs one
/// event when it finishes, with the status and latency.
///
/// Faults are logged at `warn` and passed on untouched.
#[derive(Clone, Debug, Default)]
pub struct Trace;

impl Trace {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for Trace {
    fn name(&self) -> &str {
        "trace"
    }

    fn wrap(&self, inner: BoxEndpoint) -> BoxEndpoint {
        Arc::new(TraceEndpoint { inner })
    }
}

struct TraceEndpoint {
    inner: BoxEndpoint,
}

impl Endpoint for TraceEndpoint {
    fn call(&self, req: Request) -> BoxFuture {
        let span = info_span!("http.request", method = %req.method(), path = req.path());
        let fut = span.in_scope(|| self.inner.call(req));

        Box::pin(
            async move {
                let started = Instant::now();
                let outcome = fut.await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                match &outcome {
                    Ok(res) => info!(status = res.status_code().as_u16(), latency_ms, "request finished"),
                    Err(fault) => warn!(kind = %fault.kind(), latency_ms, "request faulted: {fault}"),
                }
                outcome
            }
            .instrument(span),
        )
    }
}
