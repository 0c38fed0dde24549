//! Logger initialization
//!
//! Components log through the `log` facade under their own module target
//! (`ruuvi_pipeline::store`, `ruuvi_pipeline::endpoint`, ...), so each one can
//! be tuned separately with `RUST_LOG`, e.g.
//! `RUST_LOG=info,ruuvi_pipeline::endpoint=warn`.

use env_logger::Env;

/// Initialize the process-wide logger. Defaults to `info` level.
pub fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
