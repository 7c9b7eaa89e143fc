use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing_subscriber`.
///
/// Filter resolution: `MLSYNC_LOG`, then `RUST_LOG`, then `info` (`debug` with `verbose`).
///
/// Log field contract for mlsync:
/// - Operator-facing events use `target: "mlsync_proof"` and an `event` field.
/// - Every event in the per-episode flow carries `episode_id`.
/// - Storage throughput goes to `target: "mlsync_metrics"` at debug.
pub fn init_tracing(verbose: bool) {
    let filter = env_filter(verbose);
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

pub fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env("MLSYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}
