// Public facade — start a proxy from a config, read its stats, stop it.

pub mod proxy_api;
pub mod telemetry;

pub use proxy_api::TileProxy;
pub use telemetry::init_tracing;
