// Infrastructure layer (shared components)
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (business logic)
pub mod admission;
pub mod broadcast;
pub mod metrics_source;
pub mod registry;
pub mod scope;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
