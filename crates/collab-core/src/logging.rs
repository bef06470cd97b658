use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "COLLAB_LOG";

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global subscriber, writing to stderr. An explicit directive
/// wins over `COLLAB_LOG`. Returns false when a subscriber is already set.
pub fn init(directive: Option<&str>) -> bool {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
