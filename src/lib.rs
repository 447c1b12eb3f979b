// src/lib.rs

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod mock;
pub mod models;
pub mod routes;
pub mod session;
pub mod state;
pub mod utils;

// Re-export specific items for convenience if needed
pub use client::{GradingApi, HttpGradingClient};
pub use routes::create_router;
pub use session::SessionController;
