// Local HTTP listener — the trigger surface that feeds requests to the interceptor.

pub mod handler;
