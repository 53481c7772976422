//! Request middleware: CORS and upload rate limiting.

pub mod cors;
pub mod rate_limit;
