//! Startup and shutdown hooks.
//!
//! The [`Server`](crate::Server) runs startup hooks before it accepts the
//! first connection and shutdown hooks after the last in-flight connection has
//! drained.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::Error;
use crate::fault::Fault;

/// The two points in an application's life hooks can attach to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LifecycleEvent {
    Startup,
    Shutdown,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup  => "startup",
            Self::Shutdown => "shutdown",
        }
    }
}

impl FromStr for LifecycleEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup"  => Ok(Self::Startup),
            "shutdown" => Ok(Self::Shutdown),
            other      => Err(Error::UnknownLifecycleEvent(other.to_owned())),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// What a hook may return: nothing, or a `Result` whose error becomes a
/// [`Fault`].
pub trait IntoHookOutcome {
    fn into_hook_outcome(self) -> Result<(), Fault>;
}

impl IntoHookOutcome for () {
    fn into_hook_outcome(self) -> Result<(), Fault> {
        Ok(())
    }
}

impl<E: Into<Fault>> IntoHookOutcome for Result<(), E> {
    fn into_hook_outcome(self) -> Result<(), Fault> {
        self.map_err(Into::into)
    }
}

#[doc(hidden)]
pub type HookFuture = Pin<Box<dyn Future<Output = Result<(), Fault>> + Send + 'static>>;

#[doc(hidden)]
pub type BoxHook = Arc<dyn Fn() -> HookFuture + Send + Sync + 'static>;

/// Implemented for every `async fn() -> impl IntoHookOutcome`.
pub trait LifecycleHook: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_hook(self) -> BoxHook;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, O> private::Sealed for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: IntoHookOutcome,
{
}

impl<F, Fut, O> LifecycleHook for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: IntoHookOutcome,
{
    fn into_boxed_hook(self) -> BoxHook {
        Arc::new(move || -> HookFuture {
            let fut = self();
            Box::pin(async move { fut.await.into_hook_outcome() })
        })
    }
}

// ── Lifespan ──────────────────────────────────────────────────────────────────

/// The hooks registered on a [`Router`](crate::Router), in registration order.
#[derive(Clone, Default)]
pub struct Lifespan {
    startup: Vec<BoxHook>,
    shutdown: Vec<BoxHook>,
}

impl Lifespan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: LifecycleEvent, hook: impl LifecycleHook) {
        let hook = hook.into_boxed_hook();
        match event {
            LifecycleEvent::Startup  => self.startup.push(hook),
            LifecycleEvent::Shutdown => self.shutdown.push(hook),
        }
    }

    /// Moves `other`'s hooks after this lifespan's own.
    pub fn append(&mut self, mut other: Lifespan) {
        self.startup.append(&mut other.startup);
        self.shutdown.append(&mut other.shutdown);
    }

    pub fn len(&self, event: LifecycleEvent) -> usize {
        match event {
            LifecycleEvent::Startup  => self.startup.len(),
            LifecycleEvent::Shutdown => self.shutdown.len(),
        }
    }

    /// Runs startup hooks in order and stops at the first failure.
    pub async fn startup(&self) -> Result<(), Fault> {
        info!(hooks = self.startup.len(), "running startup hooks");
        for hook in &self.startup {
            hook().await?;
        }
        Ok(())
    }

    /// Runs every shutdown hook, even after a failure, and reports the first
    /// failure.
    pub async fn shutdown(&self) -> Result<(), Fault> {
        info!(hooks = self.shutdown.len(), "running shutdown hooks");
        let mut first = None;
        for hook in &self.shutdown {
            if let Err(fault) = hook().await {
                error!(kind = %fault.kind(), "shutdown hook failed: {fault}");
                first.get_or_insert(fault);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Lifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifespan")
            .field("startup", &self.startup.len())
            .field("shutdown", &self.shutdown.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn events_parse() {
        assert_eq!("startup".parse::<LifecycleEvent>().unwrap(), LifecycleEvent::Startup);
        assert_eq!("shutdown".parse::<LifecycleEvent>().unwrap(), LifecycleEvent::Shutdown);
        assert!(matches!(
            "teardown".parse::<LifecycleEvent>(),
            Err(Error::UnknownLifecycleEvent(e)) if e == "teardown"
        ));
    }

    #[tokio::test]
    async fn startup_stops_at_first_failure() {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut lifespan = Lifespan::new();

        let r = Arc::clone(&ran);
        lifespan.add(LifecycleEvent::Startup, move || {
            let r = Arc::clone(&r);
            async move { r.lock().unwrap().push(1) }
        });
        lifespan.add(LifecycleEvent::Startup, || async {
            Err::<(), _>(std::io::Error::other("no database"))
        });
        let r = Arc::clone(&ran);
        lifespan.add(LifecycleEvent::Startup, move || {
            let r = Arc::clone(&r);
            async move { r.lock().unwrap().push(3) }
        });

        let fault = lifespan.startup().await.unwrap_err();
        assert_eq!(fault.to_string(), "no database");
        assert_eq!(*ran.lock().unwrap(), [1]);
    }

    #[tokio::test]
    async fn shutdown_runs_every_hook() {
        let ran = Arc::new(Mutex::new(0));
        let mut lifespan = Lifespan::new();
        lifespan.add(LifecycleEvent::Shutdown, || async {
            Err::<(), _>(std::io::Error::other("flush failed"))
        });
        let r = Arc::clone(&ran);
        lifespan.add(LifecycleEvent::Shutdown, move || {
            let r = Arc::clone(&r);
            async move { *r.lock().unwrap() += 1 }
        });

        assert!(lifespan.shutdown().await.is_err());
        assert_eq!(*ran.lock().unwrap(), 1);
        assert_eq!(lifespan.len(LifecycleEvent::Shutdown), 2);
    }
}
