//! SQLite setup for the card mirror.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//!
//! Record access goes through [`crate::store::SqliteStore`].

pub mod migrations;

pub use migrations::init_db;
