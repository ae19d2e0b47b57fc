//! # retrace (library surface)
//!
//! Exposes the HTTP API module so integration tests can build the router
//! in-process. The binary in `main.rs` is the intended entry point.

pub mod api;
