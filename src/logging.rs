use tracing_subscriber::EnvFilter;

/// Install the global subscriber for the command-line tool.
///
/// `RUST_LOG` wins when set. The library itself never installs a subscriber.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ragstream=debug,warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragstream=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
