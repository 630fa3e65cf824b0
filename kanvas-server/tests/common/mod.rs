//! Shared helpers for integration tests.

pub mod server;

pub use server::TestServer;
