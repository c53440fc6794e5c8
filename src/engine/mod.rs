// Interception engine — request classification, cache-first policy and the cache store.

pub mod interceptor;
pub mod request;
pub mod response;
pub mod stats;
pub mod store;
