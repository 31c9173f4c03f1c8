//! Optional integrations compiled into this build.

/// Which optional integrations are available.
///
/// Detected once, at construction time, and handed to the
/// [`Application`](crate::Application). Nothing reads a global at request
/// time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// Built with the `graphql` feature.
    pub graphql: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self { graphql: cfg!(feature = "graphql") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_follows_cargo_features() {
        assert_eq!(Capabilities::detect().graphql, cfg!(feature = "graphql"));
        assert!(!Capabilities::default().graphql);
    }
}
