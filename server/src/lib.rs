pub mod artifacts;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod service;
pub mod state;
