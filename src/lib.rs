//! Cache-first local proxy for map tiles.
//!
//! Every request reaching the listener is offered to the
//! [`Interceptor`](engine::interceptor::Interceptor). URLs containing a tile
//! marker (`cartocdn`, `openstreetmap`, `tile`) are answered from the
//! `tile-cache` store when possible, otherwise fetched once and written
//! through when the answer is a 200 `basic`/`cors` response. Everything else is
//! passed to the network untouched.

pub mod api;
pub mod config;
pub mod engine;
pub mod server;
pub mod source;
