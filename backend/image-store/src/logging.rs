/// Tracing setup for the operator binaries
use tracing_subscriber::EnvFilter;

/// Install a global subscriber
///
/// `RUST_LOG` overrides the default `image_store=info` filter; `LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("image_store=info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // another subscriber may already be installed (tests)
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
