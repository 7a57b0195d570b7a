//! Bulkmail API - REST API server
//!
//! This crate provides the REST API for Bulkmail, including session
//! authentication, direct sends, campaigns, tracking and admin endpoints.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;
