use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `info` for our crates, `debug` with `--verbose`.
pub fn init(verbose: bool, json: bool) {
    let filter = if verbose {
        "taskrelay=debug,taskrelay_dispatch=debug,taskrelay_gateway=debug,taskrelay_cadence=debug,tower_http=debug"
    } else {
        "taskrelay=info,taskrelay_dispatch=info,taskrelay_gateway=info,taskrelay_cadence=info,taskrelay_core=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}
