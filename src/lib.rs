// Public API for integration tests and the server binary

pub mod api;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod connection;
pub mod hub;
pub mod registry;
pub mod server;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
