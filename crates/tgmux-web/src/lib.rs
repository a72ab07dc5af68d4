//! Axum HTTP surface: one router per service port plus the admin dashboard.
//!
//! Replaces the original's four standalone Flask processes with four Axum
//! routers sharing one [`AppState`], following the teacher's
//! `openintent-web::WebServer` composition (`server.rs`) but with one
//! listener per fixed port instead of one shared port, per spec.md §6.

pub mod admin;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::{ApiError, Result};
pub use server::WebServer;
pub use state::{AppState, GatewayConfig};
