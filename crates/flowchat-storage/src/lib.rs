//! Flow Chat Storage - Database and file storage abstraction
//!
//! This crate provides the persistence layer for the Flow Chat dispatcher:
//! the Postgres pool, the relational models and repositories, and the
//! local media cache / permanent object store abstraction.

pub mod db;
pub mod file;
pub mod models;
pub mod repository;

pub use db::{Database, DatabasePool};
pub use file::{FileStorage, LocalStorage, ObjectStore};
pub use models::*;
pub use repository::*;
