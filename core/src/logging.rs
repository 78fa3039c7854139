/// Logging initialization for the embedding shell
///
/// Called once by the presentation layer before constructing the session.
/// Safe to call twice; the second call is a no-op.
use tracing_subscriber::EnvFilter;

pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "trafellow_chat=debug,info".into()),
        )
        .try_init();
}
