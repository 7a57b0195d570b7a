//! Bulkmail Storage - Database abstraction
//!
//! This crate provides the data model and repositories for Bulkmail,
//! backed by PostgreSQL or an in-memory store.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
