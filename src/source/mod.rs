// Network layer abstraction — the upstream every cache miss and bypass goes to.

pub mod http_source;
pub mod traits;
