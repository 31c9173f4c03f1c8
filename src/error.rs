//! Unified error type.

use crate::fault::Fault;

/// The error type returned by strata's fallible operations.
///
/// Request-level failures travel as [`Fault`]s and end up as HTTP responses.
/// This type surfaces setup and infrastructure failures: a bad route or
/// configuration value, a port that cannot be bound, a lifecycle hook that
/// refused to start.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid route `{path}`: {source}")]
    InvalidRoute {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid mount path `{0}`: must be empty or start with `/`")]
    InvalidMount(String),

    #[error("unsupported middleware kind `{0}`: only \"http\" is supported")]
    UnsupportedMiddlewareKind(String),

    #[error("unknown lifecycle event `{0}`: expected \"startup\" or \"shutdown\"")]
    UnknownLifecycleEvent(String),

    #[error("no route named `{0}`")]
    NoRouteNamed(String),

    #[error("route `{name}` expects path params {expected:?}")]
    PathParams { name: String, expected: Vec<String> },

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("startup hook failed: {0}")]
    Startup(Fault),

    #[error("shutdown hook failed: {0}")]
    Shutdown(Fault),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = Error::UnsupportedMiddlewareKind("websocket".into());
        assert!(e.to_string().contains("websocket"));

        let e = Error::PathParams { name: "user".into(), expected: vec!["id".into()] };
        assert_eq!(e.to_string(), r#"route `user` expects path params ["id"]"#);
    }

    #[test]
    fn io_errors_convert() {
        let e: Error = std::io::Error::other("bind").into();
        assert!(matches!(e, Error::Io(_)));
    }
}
